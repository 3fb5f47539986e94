//! Per-kind message templates.

use super::model::{Emergency, EmergencyKind, Language};
use super::translate::Translator;
use crate::error::BeaconError;

/// Title and body after templating and translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub titre: String,
    pub body: String,
}

/// `titre` and `message` must be non-blank for every kind.
pub fn validate(emergency: &Emergency) -> Result<(), BeaconError> {
    let mut missing = Vec::new();
    if emergency.titre.trim().is_empty() {
        missing.push("titre");
    }
    if emergency.message.trim().is_empty() {
        missing.push("message");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BeaconError::Validation(format!(
            "missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Kind-specific body, before translation.
fn body(kind: EmergencyKind, emergency: &Emergency) -> String {
    let message = &emergency.message;
    match kind {
        EmergencyKind::Meteo => format!("{message} (zones ciblées à vérifier)"),
        EmergencyKind::Securite => {
            format!("{message} (Priorité: {})", emergency.priorite.name())
        }
        EmergencyKind::Sante => {
            format!("{message} Merci de suivre les instructions sanitaires.")
        }
        EmergencyKind::Infra => format!("{message} Merci de planifier vos déplacements."),
    }
}

pub fn render(
    kind: EmergencyKind,
    emergency: &Emergency,
    translator: &dyn Translator,
    language: Language,
) -> Rendered {
    Rendered {
        titre: translator.translate(&emergency.titre, language),
        body: translator.translate(&body(kind, emergency), language),
    }
}
