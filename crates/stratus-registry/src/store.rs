//! In-memory settings storage.

use dashmap::DashMap;

/// Settings keyed by instance identifier.
///
/// Bodies are opaque: they are stored byte for byte and never parsed.
/// The HTTP layer decodes them as UTF-8 when serving them.
#[derive(Debug, Default)]
pub struct SettingsStore {
    settings: DashMap<String, Vec<u8>>,
}

impl SettingsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores settings for an instance, replacing any previous value.
    pub fn put(&self, instance_id: &str, body: Vec<u8>) {
        self.settings.insert(instance_id.to_owned(), body);
    }

    /// Returns the settings stored for an instance.
    pub fn get(&self, instance_id: &str) -> Option<Vec<u8>> {
        self.settings.get(instance_id).map(|r| r.value().clone())
    }

    /// Removes the settings for an instance. Returns whether anything was removed.
    pub fn delete(&self, instance_id: &str) -> bool {
        self.settings.remove(instance_id).is_some()
    }

    /// Number of instances with stored settings.
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}
