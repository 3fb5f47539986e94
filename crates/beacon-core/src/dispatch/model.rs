//! Notification domain: emergencies, recipients and their preferences.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyKind {
    Meteo,
    Securite,
    Sante,
    Infra,
}

impl EmergencyKind {
    pub const ALL: [EmergencyKind; 4] = [Self::Meteo, Self::Securite, Self::Sante, Self::Infra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meteo => "meteo",
            Self::Securite => "securite",
            Self::Sante => "sante",
            Self::Infra => "infra",
        }
    }

    /// Task type used on the queue for this kind.
    pub fn task_type(&self) -> TaskType {
        TaskType::new(self.as_str())
    }
}

impl fmt::Display for EmergencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmergencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown emergency kind: {s}"))
    }
}

/// Lower rank = more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critique,
    Haute,
    #[default]
    Normale,
}

impl Priority {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Critique => "CRITIQUE",
            Self::Haute => "HAUTE",
            Self::Normale => "NORMALE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Fr,
    En,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fr => "fr",
            Self::En => "en",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "fr" => Some(Self::Fr),
            "en" => Some(Self::En),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Profile language.
    #[serde(default)]
    pub language: Language,
    /// Free-form code declared by the recipient; ignored when unsupported.
    #[serde(default)]
    pub preferred_language: Option<String>,
}

impl Recipient {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            phone: None,
            language: Language::Fr,
            preferred_language: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_preferred_language(mut self, code: impl Into<String>) -> Self {
        self.preferred_language = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_channel() -> String {
    "email".to_string()
}

fn default_active() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: None,
            channel: default_channel(),
            active: true,
        }
    }
}

impl Preferences {
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }
}

/// Task payload for a notification broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emergency {
    #[serde(default)]
    pub titre: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub priorite: Priority,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

impl Emergency {
    pub fn new(titre: impl Into<String>, message: impl Into<String>, priorite: Priority) -> Self {
        Self {
            titre: titre.into(),
            message: message.into(),
            priorite,
            recipients: Vec::new(),
        }
    }

    pub fn to(mut self, recipients: impl IntoIterator<Item = Recipient>) -> Self {
        self.recipients.extend(recipients);
        self
    }
}

/// Rendered notification handed to a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub recipient: Recipient,
    pub priority: Priority,
    pub language: Language,
    pub titre: String,
    pub body: String,
}
