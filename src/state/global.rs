use super::{Scope, StateEntry, StateValue};
use std::collections::HashMap;

/// In-memory cross-tab keyed state (API host/token, resolved org id, …).
/// Same ownership rule as [`super::TabStateStore`]: the relay is the only
/// writer.
#[derive(Default)]
pub struct GlobalStateStore {
    entries: HashMap<String, StateEntry>,
}

impl GlobalStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&StateEntry> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: &str, value: StateValue, persisted: bool) {
        self.entries.insert(
            key.to_string(),
            StateEntry {
                key: key.to_string(),
                value,
                scope: Scope::Global,
                persisted,
            },
        );
    }
}
