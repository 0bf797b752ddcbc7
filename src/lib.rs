pub mod api;
pub mod bridge;
pub mod client;
pub mod config;
pub mod identity;
pub mod ipc;
pub mod relay;
pub mod sdk;
pub mod state;
pub mod storage;
pub mod util;

// Re-export auth so main.rs can use flagscope::auth directly.
pub use ipc::auth;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use config::DaemonConfig;
use ipc::event::EventBroadcaster;
use relay::StateRelay;

/// Shared application state passed to every RPC handler and background task.
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub broadcaster: Arc<EventBroadcaster>,
    /// The single mutation authority for tab/global state.
    pub relay: StateRelay,
    pub started_at: std::time::Instant,
    /// Stable daemon identity (uuid persisted in the data dir).
    pub daemon_id: String,
    /// Local WebSocket auth token.  Every new connection must send a
    /// `daemon.auth` RPC with this token before any other method call.
    /// Empty string means auth is disabled (not recommended).
    pub auth_token: String,
    /// Currently connected WebSocket clients.
    pub connected_clients: AtomicUsize,
}
