pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Point-in-time health/capability assessment of the page's SDK instance.
///
/// Produced by the Page Bridge after discovery and after every health probe;
/// travels to the UI surfaces as the `sdkHealth` state property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkSnapshot {
    pub can_connect: bool,
    pub has_payload: bool,
    pub has_client_key: bool,
    pub sdk_found: bool,
    pub version: Option<String>,
    pub client_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SdkSnapshot {
    /// Snapshot reported when no SDK instance appeared within the
    /// discovery window.
    pub fn not_found() -> Self {
        Self {
            can_connect: false,
            has_payload: false,
            has_client_key: false,
            sdk_found: false,
            version: None,
            client_key: None,
            error_message: Some("SDK not found".to_string()),
            payload: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SdkError {
    /// SDK is present but this build lacks a required capability.
    #[error("SDK version {version} does not support {capability}")]
    VersionMismatch {
        version: String,
        capability: &'static str,
    },
    #[error("refresh failed: {0}")]
    Refresh(String),
}

/// Observer hooks an [`SdkConnector`] fires when the page itself mutates
/// SDK state (as opposed to mutations pushed in from the extension side).
pub struct SdkHooks {
    pub on_attributes_changed: Box<dyn Fn(Map<String, Value>) + Send + Sync>,
    pub on_tracking_fired: Box<dyn Fn(Value) + Send + Sync>,
}

/// Capability-checked adapter over the live feature-flagging SDK instance
/// embedded in the inspected page.
///
/// The bridge never reaches into SDK internals; everything it needs is
/// expressed here, including the observer hooks that replace runtime
/// method-wrapping. `install_hooks` is additive — every registered hook set
/// fires on every underlying call — so the bridge guards against double
/// registration itself (see `PageBridge::install_hooks_once`).
#[async_trait]
pub trait SdkConnector: Send + Sync {
    fn version(&self) -> String;
    fn client_key(&self) -> Option<String>;
    fn api_host(&self) -> Option<String>;

    fn attributes(&self) -> Map<String, Value>;
    fn set_attributes(&self, attrs: Map<String, Value>);

    /// Older SDK builds predate attribute overrides; callers must check
    /// before calling `set_attribute_overrides`.
    fn supports_attribute_overrides(&self) -> bool;
    fn set_attribute_overrides(&self, attrs: Map<String, Value>) -> Result<(), SdkError>;

    /// Feature definitions keyed by feature id.
    fn features(&self) -> Map<String, Value>;
    fn experiments(&self) -> Vec<Value>;

    fn forced_features(&self) -> Map<String, Value>;
    fn set_forced_features(&self, forces: Map<String, Value>);
    fn forced_variations(&self) -> Map<String, Value>;
    fn set_forced_variations(&self, forces: Map<String, Value>);

    /// Ask the SDK to re-fetch its feature payload.
    async fn refresh(&self) -> Result<(), SdkError>;

    fn install_hooks(&self, hooks: SdkHooks);
}
