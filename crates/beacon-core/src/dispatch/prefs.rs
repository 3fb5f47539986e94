use std::collections::HashMap;
use std::sync::RwLock;

use super::model::Preferences;

/// Per-recipient preferences lookup.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, recipient_id: &str) -> Option<Preferences>;

    fn save(&self, recipient_id: &str, preferences: Preferences);
}

#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    prefs: RwLock<HashMap<String, Preferences>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn get(&self, recipient_id: &str) -> Option<Preferences> {
        self.prefs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(recipient_id)
            .cloned()
    }

    fn save(&self, recipient_id: &str, preferences: Preferences) {
        self.prefs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(recipient_id.to_string(), preferences);
    }
}
