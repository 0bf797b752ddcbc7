use serde_json::{json, Value};
use tokio::sync::broadcast;

/// One-to-many notification emitted after a mutation or control action.
///
/// Every connected WebSocket client and every in-process subscriber hook
/// receives every event and filters for the properties it cares about.
#[derive(Debug, Clone)]
pub enum Event {
    /// A global-scope property changed.
    GlobalStateChanged { property: String, value: Value },
    /// A tab-scope property changed.
    TabStateChanged {
        tab_id: String,
        property: String,
        value: Value,
    },
    /// A UI surface asked for a value to reach the OS clipboard; whichever
    /// surface has clipboard access performs the copy.
    CopyToClipboard { value: String },
    /// A UI surface asked the page SDK to re-fetch its payload.
    RefreshRequested { tab_id: String },
    /// The page bridge reported an error (malformed payload, version
    /// mismatch, …). Rendered as an inline banner, never fatal.
    SdkError { tab_id: String, error: String },
    /// Daemon finished starting.
    Ready { version: String, port: u16 },
}

impl Event {
    /// Render as a JSON-RPC notification string for WebSocket clients.
    pub fn to_notification(&self) -> String {
        let (method, params) = match self {
            Event::GlobalStateChanged { property, value } => (
                "globalStateChanged",
                json!({ "property": property, "value": value }),
            ),
            Event::TabStateChanged {
                tab_id,
                property,
                value,
            } => (
                "tabStateChanged",
                json!({ "tabId": tab_id, "property": property, "value": value }),
            ),
            Event::CopyToClipboard { value } => ("copyToClipboard", json!({ "value": value })),
            Event::RefreshRequested { tab_id } => ("sdk.refresh", json!({ "tabId": tab_id })),
            Event::SdkError { tab_id, error } => {
                ("sdkError", json!({ "tabId": tab_id, "error": error }))
            }
            Event::Ready { version, port } => {
                ("daemon.ready", json!({ "version": version, "port": port }))
            }
        };
        json!({ "jsonrpc": "2.0", "method": method, "params": params }).to_string()
    }
}

/// Broadcasts events to all current subscribers: connected WebSocket
/// clients, in-process subscriber hooks, and the per-tab content relays.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish to all current subscribers.
    pub fn publish(&self, event: Event) {
        // Ignore errors — no subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Subscribe to all events. Dropping the receiver unsubscribes; there
    /// is no other cancellation primitive.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
