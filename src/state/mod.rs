pub mod global;
pub mod tab;
pub mod value;

pub use global::GlobalStateStore;
pub use tab::TabStateStore;
pub use value::{Experiment, FeatureDefinition, FeatureRule, StateValue, ValueError};

use serde::{Deserialize, Serialize};

/// Which store a state entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Partitioned per browser tab; reset on navigation/close.
    Tab,
    /// Shared across all tabs (credentials, resolved org id, …).
    Global,
}

/// One keyed state value plus its persistence flag.
///
/// For a given (scope, key) pair there is at most one authoritative entry at
/// any time; the relay is the only writer.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub key: String,
    pub value: StateValue,
    pub scope: Scope,
    /// Written through to durable storage on every set.
    pub persisted: bool,
}
