//! Dispatch - emergency notification の配信
//!
//! `NotificationDispatcher` は 1 つの `EmergencyKind` を担当する `TaskProcessor`。
//! payload（`Emergency`）を decode し、受信者ごとに言語とチャネルを決めて配信する。
//!
//! - **model**: Emergency / Recipient / Preferences
//! - **channel**: `Channel` trait と email / sms / app
//! - **template**: kind ごとの本文
//! - **translate**: `Translator` trait
//! - **prefs**: `PreferenceStore` trait

pub mod channel;
pub mod model;
pub mod prefs;
pub mod template;
pub mod translate;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

pub use self::channel::{AppChannel, Channel, EmailChannel, SmsChannel};
pub use self::model::{
    Emergency, EmergencyKind, Language, Message, Preferences, Priority, Recipient,
};
pub use self::prefs::{InMemoryPreferenceStore, PreferenceStore};
pub use self::translate::{DictionaryTranslator, IdentityTranslator, Translator};

use crate::domain::TaskType;
use crate::error::BeaconError;
use crate::ports::TaskProcessor;

/// Channel used when a recipient has no usable preference.
pub const FALLBACK_CHANNEL: &str = "email";

/// Channels by name, filled at startup.
#[derive(Default, Clone)]
pub struct Channels {
    by_name: BTreeMap<String, Arc<dyn Channel>>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    /// email, sms and app.
    pub fn standard() -> Self {
        Self::new()
            .with(EmailChannel)
            .with(SmsChannel)
            .with(AppChannel)
    }

    /// Add or replace the channel registered under `channel.name()`.
    pub fn with(mut self, channel: impl Channel + 'static) -> Self {
        self.by_name
            .insert(channel.name().to_string(), Arc::new(channel));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.by_name.keys().map(String::as_str).collect()
    }

    /// `name`, or the fallback channel when `name` is unknown.
    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn Channel>, BeaconError> {
        self.by_name
            .get(name)
            .or_else(|| self.by_name.get(FALLBACK_CHANNEL))
            .ok_or_else(|| {
                BeaconError::Configuration(format!(
                    "no channel {name:?} and no {FALLBACK_CHANNEL:?} fallback registered"
                ))
            })
    }
}

/// Language for one recipient: preferences > declared preferred language > profile.
pub fn resolve_language(recipient: &Recipient, preferences: Option<&Preferences>) -> Language {
    if let Some(language) = preferences.and_then(|p| p.language) {
        return language;
    }
    recipient
        .preferred_language
        .as_deref()
        .and_then(Language::parse)
        .unwrap_or(recipient.language)
}

pub struct NotificationDispatcher {
    kind: EmergencyKind,
    channels: Arc<Channels>,
    preferences: Arc<dyn PreferenceStore>,
    translator: Arc<dyn Translator>,
}

impl NotificationDispatcher {
    pub fn new(
        kind: EmergencyKind,
        channels: Arc<Channels>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            kind,
            channels,
            preferences,
            translator: Arc::new(IdentityTranslator),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn kind(&self) -> EmergencyKind {
        self.kind
    }

    /// Deliver `emergency` to every active recipient.
    pub async fn send(&self, emergency: &Emergency) -> Result<Value, BeaconError> {
        template::validate(emergency)?;

        match self.kind {
            EmergencyKind::Securite if emergency.priorite == Priority::Critique => {
                warn!(titre = %emergency.titre, "critical security alert: emergency exit");
            }
            EmergencyKind::Infra => {
                info!(titre = %emergency.titre, "notifying impacted recipients");
            }
            _ => {}
        }

        let mut delivered = 0_usize;
        let mut skipped = 0_usize;
        for recipient in &emergency.recipients {
            let prefs = self.preferences.get(&recipient.id);
            if prefs.as_ref().is_some_and(|p| !p.active) {
                debug!(recipient = %recipient.id, "recipient inactive, skipping");
                skipped += 1;
                continue;
            }

            let language = resolve_language(recipient, prefs.as_ref());
            let rendered = template::render(self.kind, emergency, self.translator.as_ref(), language);
            let message = Message {
                recipient: recipient.clone(),
                priority: emergency.priorite,
                language,
                titre: rendered.titre,
                body: rendered.body,
            };

            let channel_name = prefs
                .as_ref()
                .map(|p| p.channel.as_str())
                .filter(|c| !c.is_empty())
                .unwrap_or(FALLBACK_CHANNEL);
            let channel = self.channels.resolve(channel_name)?;
            channel.deliver(&message).await?;
            delivered += 1;
        }

        Ok(json!({
            "kind": self.kind.as_str(),
            "delivered": delivered,
            "skipped": skipped,
        }))
    }
}

#[async_trait]
impl TaskProcessor for NotificationDispatcher {
    async fn process(&self, task_type: &TaskType, payload: &Value) -> Result<Value, BeaconError> {
        if task_type.as_str() != self.kind.as_str() {
            debug!(task_type = %task_type, kind = %self.kind, "dispatcher used for foreign task type");
        }
        let emergency: Emergency = serde_json::from_value(payload.clone())?;
        self.send(&emergency).await
    }
}
