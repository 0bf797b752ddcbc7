use super::{Scope, StateEntry, StateValue};
use std::collections::HashMap;

/// In-memory per-tab keyed state.
///
/// One bucket per tab, created lazily on first write and dropped when the
/// tab closes. Plain data — all locking and change notification happens in
/// the relay, the store's single owner.
#[derive(Default)]
pub struct TabStateStore {
    tabs: HashMap<String, HashMap<String, StateEntry>>,
}

impl TabStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tab_id: &str, key: &str) -> Option<&StateEntry> {
        self.tabs.get(tab_id).and_then(|bucket| bucket.get(key))
    }

    pub fn set(&mut self, tab_id: &str, key: &str, value: StateValue, persisted: bool) {
        let bucket = self.tabs.entry(tab_id.to_string()).or_default();
        bucket.insert(
            key.to_string(),
            StateEntry {
                key: key.to_string(),
                value,
                scope: Scope::Tab,
                persisted,
            },
        );
    }

    /// Drop everything for a closed tab.
    pub fn remove_tab(&mut self, tab_id: &str) {
        self.tabs.remove(tab_id);
    }

    /// Navigation reset: page-derived entries are stale once the tab moves
    /// to a new document, so everything non-persisted is dropped and the
    /// url entry is replaced.
    pub fn reset_for_navigation(&mut self, tab_id: &str, url: &str) {
        if let Some(bucket) = self.tabs.get_mut(tab_id) {
            bucket.retain(|_, entry| entry.persisted);
        }
        self.set(tab_id, "url", StateValue::Text(url.to_string()), false);
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }
}
