//! The messaging relay — the single mutation authority for state.
//!
//! Every other context (UI surfaces over WebSocket, the in-process
//! subscriber hooks, the per-tab content relays) holds read-mostly cached
//! copies and pushes changes through here. After every mutation the relay
//! broadcasts the authoritative value to all current subscribers.
//!
//! `set_state`/`get_state` are fire-and-forget from the caller's
//! perspective: there is no failure acknowledgement beyond the reply
//! channel, and callers infer success from the subsequent broadcast. Several
//! UI flows depend on this optimistic-update-then-reconcile pattern, so it
//! is deliberate, not an oversight.

use crate::ipc::event::{Event, EventBroadcaster};
use crate::state::{GlobalStateStore, StateValue, TabStateStore, ValueError};
use crate::storage::{namespaced, Storage};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cap on append-mode arrays (log streams). Oldest entries are dropped.
const MAX_APPEND_ENTRIES: usize = 1000;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValueError),
}

/// Handle to the relay. Cheap to clone; all clones share the same stores.
#[derive(Clone)]
pub struct StateRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    global: RwLock<GlobalStateStore>,
    tabs: RwLock<TabStateStore>,
    storage: Arc<Storage>,
    broadcaster: Arc<EventBroadcaster>,
}

impl StateRelay {
    /// Stores are injected, not ambient: constructed once at daemon start
    /// and owned here for the life of the process.
    pub fn new(
        global: GlobalStateStore,
        tabs: TabStateStore,
        storage: Arc<Storage>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                global: RwLock::new(global),
                tabs: RwLock::new(tabs),
                storage,
                broadcaster,
            }),
        }
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.inner.broadcaster
    }

    /// Look up (or lazily load) the current value of a property.
    ///
    /// Returns `None` for absent keys — not-found is never an error. When a
    /// value exists it is also re-broadcast, so a late-joining subscriber
    /// gets both a direct reply and the notification stream.
    pub async fn get_state(
        &self,
        property: &str,
        tab_id: Option<&str>,
        persist: bool,
    ) -> Option<Value> {
        let value = match tab_id {
            Some(tab) => self.get_tab(property, tab, persist).await,
            None => self.get_global(property, persist).await,
        };
        if let Some(v) = &value {
            self.broadcast(property, tab_id, v.clone());
        }
        value
    }

    async fn get_global(&self, property: &str, persist: bool) -> Option<Value> {
        if let Some(entry) = self.inner.global.read().await.get(property) {
            return Some(entry.value.to_json());
        }
        if !persist {
            return None;
        }
        // Lazy load from durable storage on first access.
        let raw = match self.inner.storage.load_global(&namespaced(property)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(property, err = %e, "failed to load persisted global value");
                return None;
            }
        };
        match StateValue::from_property(property, raw) {
            Ok(value) => {
                let json = value.to_json();
                self.inner.global.write().await.set(property, value, true);
                Some(json)
            }
            Err(e) => {
                warn!(property, err = %e, "persisted global value failed validation");
                None
            }
        }
    }

    async fn get_tab(&self, property: &str, tab_id: &str, persist: bool) -> Option<Value> {
        if let Some(entry) = self.inner.tabs.read().await.get(tab_id, property) {
            return Some(entry.value.to_json());
        }
        if !persist {
            return None;
        }
        let raw = match self.inner.storage.load_tab(tab_id, property).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(property, tab_id, err = %e, "failed to load persisted tab value");
                return None;
            }
        };
        match StateValue::from_property(property, raw) {
            Ok(value) => {
                let json = value.to_json();
                self.inner
                    .tabs
                    .write()
                    .await
                    .set(tab_id, property, value, true);
                Some(json)
            }
            Err(e) => {
                warn!(property, tab_id, err = %e, "persisted tab value failed validation");
                None
            }
        }
    }

    /// Write a property and broadcast the new authoritative value.
    ///
    /// `append` extends an existing array value (log streams) instead of
    /// replacing it. Persistence is write-through and fire-and-forget: a
    /// failed durable write is logged and the in-memory value stands.
    pub async fn set_state(
        &self,
        property: &str,
        raw: Value,
        tab_id: Option<&str>,
        persist: bool,
        append: bool,
    ) -> Result<(), RelayError> {
        let value = if append {
            self.merged_append(property, tab_id, raw).await?
        } else {
            StateValue::from_property(property, raw)?
        };
        let json = value.to_json();

        // Broadcast while still holding the write guard: subscribers must
        // observe notifications in mutation order, or two racing writers
        // could leave every surface converged on the losing value.
        match tab_id {
            Some(tab) => {
                let mut tabs = self.inner.tabs.write().await;
                tabs.set(tab, property, value, persist);
                self.broadcast(property, tab_id, json.clone());
            }
            None => {
                let mut global = self.inner.global.write().await;
                global.set(property, value, persist);
                self.broadcast(property, tab_id, json.clone());
            }
        }
        debug!(property, tab_id = tab_id.unwrap_or("-"), "state set");

        if persist {
            let storage = self.inner.storage.clone();
            let property = property.to_string();
            let tab_id = tab_id.map(|t| t.to_string());
            tokio::spawn(async move {
                let result = match (&tab_id, json.is_null()) {
                    (Some(tab), _) => storage.save_tab(tab, &property, &json).await,
                    // A null global write clears the value; drop the row
                    // rather than persisting "null".
                    (None, true) => storage.delete_global(&namespaced(&property)).await,
                    (None, false) => storage.save_global(&namespaced(&property), &json).await,
                };
                if let Err(e) = result {
                    // In-memory state stands; no retry.
                    warn!(property = %property, err = %e, "persisted write failed");
                }
            });
        }
        Ok(())
    }

    async fn merged_append(
        &self,
        property: &str,
        tab_id: Option<&str>,
        raw: Value,
    ) -> Result<StateValue, RelayError> {
        let existing = match tab_id {
            Some(tab) => self
                .inner
                .tabs
                .read()
                .await
                .get(tab, property)
                .map(|e| e.value.clone()),
            None => self
                .inner
                .global
                .read()
                .await
                .get(property)
                .map(|e| e.value.clone()),
        };
        let mut merged = match existing {
            Some(mut v) => match v.as_array_mut() {
                Some(items) => std::mem::take(items),
                // Appending to a non-array is a shape mismatch, not an
                // implicit overwrite.
                None => {
                    return Err(RelayError::Validation(ValueError::Invalid {
                        property: property.to_string(),
                        reason: "append target is not an array".to_string(),
                    }))
                }
            },
            None => Vec::new(),
        };
        match raw {
            Value::Array(items) => merged.extend(items),
            other => merged.push(other),
        }
        if merged.len() > MAX_APPEND_ENTRIES {
            let excess = merged.len() - MAX_APPEND_ENTRIES;
            merged.drain(..excess);
        }
        StateValue::from_property(property, Value::Array(merged)).map_err(RelayError::from)
    }

    /// Number of tabs currently holding state.
    pub async fn tab_count(&self) -> usize {
        self.inner.tabs.read().await.tab_count()
    }

    /// Drop all state for a closed tab.
    pub async fn tab_closed(&self, tab_id: &str) {
        self.inner.tabs.write().await.remove_tab(tab_id);
        let storage = self.inner.storage.clone();
        let tab_id = tab_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = storage.clear_tab(&tab_id).await {
                warn!(tab_id = %tab_id, err = %e, "failed to clear persisted tab state");
            }
        });
    }

    /// Navigation reset: non-persisted entries are dropped and the url
    /// entry is replaced with the new document URL.
    pub async fn tab_navigated(&self, tab_id: &str, url: &str) {
        self.inner
            .tabs
            .write()
            .await
            .reset_for_navigation(tab_id, url);
        self.broadcast("url", Some(tab_id), Value::String(url.to_string()));
    }

    fn broadcast(&self, property: &str, tab_id: Option<&str>, value: Value) {
        let event = match tab_id {
            Some(tab) => Event::TabStateChanged {
                tab_id: tab.to_string(),
                property: property.to_string(),
                value,
            },
            None => Event::GlobalStateChanged {
                property: property.to_string(),
                value,
            },
        };
        self.inner.broadcaster.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn make_relay(dir: &TempDir) -> StateRelay {
        let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
        StateRelay::new(
            GlobalStateStore::new(),
            TabStateStore::new(),
            storage,
            Arc::new(EventBroadcaster::new()),
        )
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let dir = TempDir::new().unwrap();
        let relay = make_relay(&dir).await;
        relay
            .set_state("forcedFeatures", json!({"banner": true}), Some("t1"), false, false)
            .await
            .unwrap();
        let v = relay.get_state("forcedFeatures", Some("t1"), false).await;
        assert_eq!(v, Some(json!({"banner": true})));
        // Same key, different scope — independent.
        assert_eq!(relay.get_state("forcedFeatures", None, false).await, None);
    }

    #[tokio::test]
    async fn invalid_shape_is_rejected_and_not_stored() {
        let dir = TempDir::new().unwrap();
        let relay = make_relay(&dir).await;
        let err = relay
            .set_state("attributes", json!("not-an-object"), Some("t1"), false, false)
            .await;
        assert!(err.is_err());
        assert_eq!(relay.get_state("attributes", Some("t1"), false).await, None);
    }

    #[tokio::test]
    async fn mutation_broadcasts_to_subscribers() {
        let dir = TempDir::new().unwrap();
        let relay = make_relay(&dir).await;
        let mut rx = relay.broadcaster().subscribe();
        relay
            .set_state("apiHost", json!("https://api.example.com"), None, false, false)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            Event::GlobalStateChanged { property, value } => {
                assert_eq!(property, "apiHost");
                assert_eq!(value, json!("https://api.example.com"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn append_extends_and_caps_log_streams() {
        let dir = TempDir::new().unwrap();
        let relay = make_relay(&dir).await;
        relay
            .set_state("logEvents", json!({"msg": "first"}), Some("t1"), false, true)
            .await
            .unwrap();
        relay
            .set_state(
                "logEvents",
                json!([{ "msg": "second" }, { "msg": "third" }]),
                Some("t1"),
                false,
                true,
            )
            .await
            .unwrap();
        let v = relay
            .get_state("logEvents", Some("t1"), false)
            .await
            .unwrap();
        let items = v.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["msg"], "first");
        assert_eq!(items[2]["msg"], "third");
    }

    #[tokio::test]
    async fn persisted_value_lazily_loads_after_restart() {
        let dir = TempDir::new().unwrap();
        {
            let relay = make_relay(&dir).await;
            relay
                .set_state("apiKey", json!("secret-key"), None, true, false)
                .await
                .unwrap();
            // Write-through is fire-and-forget; give it a turn to land.
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        // Fresh relay over the same data dir — empty memory, lazy load.
        let relay = make_relay(&dir).await;
        assert_eq!(relay.get_state("apiKey", None, false).await, None);
        assert_eq!(
            relay.get_state("apiKey", None, true).await,
            Some(json!("secret-key"))
        );
    }

    #[tokio::test]
    async fn append_to_a_non_array_is_rejected_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let relay = make_relay(&dir).await;
        relay
            .set_state("url", json!("https://example.com/a"), Some("t1"), false, false)
            .await
            .unwrap();
        let err = relay
            .set_state("url", json!({"msg": "x"}), Some("t1"), false, true)
            .await;
        assert!(err.is_err());
        // The existing value stands untouched.
        assert_eq!(
            relay.get_state("url", Some("t1"), false).await,
            Some(json!("https://example.com/a"))
        );
    }

    #[tokio::test]
    async fn null_write_clears_the_persisted_global_row() {
        let dir = TempDir::new().unwrap();
        {
            let relay = make_relay(&dir).await;
            relay
                .set_state("apiKey", json!("sk"), None, true, false)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            relay
                .set_state("apiKey", Value::Null, None, true, false)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let relay = make_relay(&dir).await;
        assert_eq!(relay.get_state("apiKey", None, true).await, None);
    }

    #[tokio::test]
    async fn closed_tab_state_is_gone() {
        let dir = TempDir::new().unwrap();
        let relay = make_relay(&dir).await;
        relay
            .set_state("features", json!({"a": {"defaultValue": 1}}), Some("t1"), false, false)
            .await
            .unwrap();
        relay.tab_closed("t1").await;
        assert_eq!(relay.get_state("features", Some("t1"), false).await, None);
    }

    #[tokio::test]
    async fn navigation_resets_page_state_but_keeps_persisted() {
        let dir = TempDir::new().unwrap();
        let relay = make_relay(&dir).await;
        relay
            .set_state("features", json!({"a": {"defaultValue": 1}}), Some("t1"), false, false)
            .await
            .unwrap();
        relay
            .set_state("apiKey", json!("sk"), Some("t1"), true, false)
            .await
            .unwrap();
        relay.tab_navigated("t1", "https://example.com/next").await;
        assert_eq!(relay.get_state("features", Some("t1"), false).await, None);
        assert_eq!(
            relay.get_state("apiKey", Some("t1"), false).await,
            Some(json!("sk"))
        );
        assert_eq!(
            relay.get_state("url", Some("t1"), false).await,
            Some(json!("https://example.com/next"))
        );
    }
}
