//! Subscriber hooks — the per-UI-surface client side of the relay.
//!
//! A hook mirrors what the web UI surfaces do over WebSocket, for consumers
//! living in the daemon process itself (DevTools panel backend, tests):
//! request the current value on mount, follow the broadcast stream, and
//! expose an optimistic setter.

use crate::ipc::event::Event;
use crate::relay::StateRelay;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// A mounted subscription to one (property, tab?) pair.
///
/// `value()` starts as `None` and `is_ready()` as false; ready flips true
/// once the first authoritative answer arrives — the direct reply to the
/// mount-time `get_state`, even when that reply is "absent". A default is
/// never assumed to be the real value.
///
/// Dropping the hook unmounts it: the broadcast receiver is dropped and any
/// in-flight replies are discarded.
pub struct StateHook {
    property: String,
    tab_id: Option<String>,
    persist: bool,
    relay: StateRelay,
    value_tx: Arc<watch::Sender<Option<Value>>>,
    value_rx: watch::Receiver<Option<Value>>,
    ready_rx: watch::Receiver<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl StateHook {
    pub fn mount(relay: &StateRelay, property: &str, tab_id: Option<&str>, persist: bool) -> Self {
        let (value_tx, value_rx) = watch::channel(None);
        let value_tx = Arc::new(value_tx);
        let (ready_tx, ready_rx) = watch::channel(false);

        // Subscribe before the initial get so no broadcast can slip between
        // the reply and the stream.
        let mut events = relay.broadcaster().subscribe();
        let task = {
            let relay = relay.clone();
            let property = property.to_string();
            let tab_id = tab_id.map(|t| t.to_string());
            let value_tx = value_tx.clone();
            tokio::spawn(async move {
                let reply = relay
                    .get_state(&property, tab_id.as_deref(), persist)
                    .await;
                value_tx.send_replace(reply);
                ready_tx.send_replace(true);

                loop {
                    match events.recv().await {
                        Ok(Event::GlobalStateChanged { property: p, value })
                            if tab_id.is_none() && p == property =>
                        {
                            value_tx.send_replace(Some(value));
                        }
                        Ok(Event::TabStateChanged {
                            tab_id: t,
                            property: p,
                            value,
                        }) if tab_id.as_deref() == Some(t.as_str()) && p == property => {
                            value_tx.send_replace(Some(value));
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!(property = %property, skipped = n, "hook lagged behind broadcasts");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        Self {
            property: property.to_string(),
            tab_id: tab_id.map(|t| t.to_string()),
            persist,
            relay: relay.clone(),
            value_tx,
            value_rx,
            ready_rx,
            task,
        }
    }

    /// Current cached value. May be an optimistic local write that the next
    /// authoritative broadcast will overwrite.
    pub fn current(&self) -> Option<Value> {
        self.value_rx.borrow().clone()
    }

    /// Watch the value stream (for awaiting changes in tests and panels).
    pub fn watch_value(&self) -> watch::Receiver<Option<Value>> {
        self.value_rx.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    pub fn watch_ready(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Optimistic setter: local display state updates immediately, then the
    /// write is pushed to the relay fire-and-forget. Whatever broadcast
    /// arrives last wins — concurrent setters from other surfaces are not
    /// serialized against this one.
    pub fn set(&self, value: Value) {
        self.value_tx.send_replace(Some(value.clone()));
        let relay = self.relay.clone();
        let property = self.property.clone();
        let tab_id = self.tab_id.clone();
        let persist = self.persist;
        tokio::spawn(async move {
            if let Err(e) = relay
                .set_state(&property, value, tab_id.as_deref(), persist, false)
                .await
            {
                // Rejected writes are reconciled away by the next broadcast.
                debug!(property = %property, err = %e, "optimistic write rejected");
            }
        });
    }
}

impl Drop for StateHook {
    fn drop(&mut self) {
        self.task.abort();
    }
}
