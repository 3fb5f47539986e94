//! Translator port + two simple implementations.

use std::collections::HashMap;

use super::model::Language;

pub trait Translator: Send + Sync {
    /// Translate `text` into `target`. Unknown text comes back unchanged.
    fn translate(&self, text: &str, target: Language) -> String;
}

/// Returns the text as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn translate(&self, text: &str, _target: Language) -> String {
        text.to_string()
    }
}

/// Manual dictionary: source text -> (language -> translation).
///
/// Lookup is exact first, then case-insensitive on the trimmed text.
#[derive(Debug, Clone, Default)]
pub struct DictionaryTranslator {
    entries: HashMap<String, HashMap<Language, String>>,
}

impl DictionaryTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        source: impl Into<String>,
        target: Language,
        translation: impl Into<String>,
    ) -> &mut Self {
        self.entries
            .entry(source.into())
            .or_default()
            .insert(target, translation.into());
        self
    }

    fn lookup(&self, text: &str, target: Language) -> Option<&String> {
        let key = text.trim();
        if let Some(entry) = self.entries.get(key) {
            return entry.get(&target);
        }
        let lower = key.to_lowercase();
        self.entries
            .iter()
            .find(|(source, _)| source.to_lowercase() == lower)
            .and_then(|(_, entry)| entry.get(&target))
    }
}

impl Translator for DictionaryTranslator {
    fn translate(&self, text: &str, target: Language) -> String {
        if text.is_empty() {
            return String::new();
        }
        self.lookup(text, target)
            .cloned()
            .unwrap_or_else(|| text.to_string())
    }
}
