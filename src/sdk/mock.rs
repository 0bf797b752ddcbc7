//! In-memory SDK stand-in used by the test suite and local demos.
//!
//! Behaves like a minimal embedded feature-flagging runtime: holds
//! attributes, feature definitions, experiments, and forced overrides, and
//! fires observer hooks the same way a patched live instance would.

use super::{SdkConnector, SdkError, SdkHooks};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Mutex;

pub struct MockSdk {
    version: String,
    client_key: Option<String>,
    api_host: Option<String>,
    supports_overrides: bool,
    state: Mutex<MockState>,
    hooks: Mutex<Vec<SdkHooks>>,
    /// When set, `refresh` fails with this message.
    refresh_error: Mutex<Option<String>>,
}

#[derive(Default)]
struct MockState {
    attributes: Map<String, Value>,
    attribute_overrides: Map<String, Value>,
    features: Map<String, Value>,
    experiments: Vec<Value>,
    forced_features: Map<String, Value>,
    forced_variations: Map<String, Value>,
    refresh_count: u64,
}

impl MockSdk {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            client_key: Some("sdk-test-key".to_string()),
            api_host: None,
            supports_overrides: true,
            state: Mutex::new(MockState::default()),
            hooks: Mutex::new(Vec::new()),
            refresh_error: Mutex::new(None),
        }
    }

    pub fn with_client_key(mut self, key: Option<&str>) -> Self {
        self.client_key = key.map(|k| k.to_string());
        self
    }

    pub fn with_api_host(mut self, host: &str) -> Self {
        self.api_host = Some(host.to_string());
        self
    }

    /// Simulate an SDK build that predates attribute overrides.
    pub fn without_override_support(mut self) -> Self {
        self.supports_overrides = false;
        self
    }

    pub fn set_features(&self, features: Map<String, Value>) {
        self.state.lock().unwrap().features = features;
    }

    pub fn set_experiments(&self, experiments: Vec<Value>) {
        self.state.lock().unwrap().experiments = experiments;
    }

    pub fn set_refresh_error(&self, msg: &str) {
        *self.refresh_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn refresh_count(&self) -> u64 {
        self.state.lock().unwrap().refresh_count
    }

    pub fn attribute_overrides(&self) -> Map<String, Value> {
        self.state.lock().unwrap().attribute_overrides.clone()
    }

    /// Simulate the page firing a tracking call (experiment exposure).
    /// Every installed hook set observes it — exactly-once delivery is the
    /// bridge's responsibility, not ours.
    pub fn track(&self, experiment_key: &str, variation: i64) {
        let event = json!({
            "experimentKey": experiment_key,
            "variationId": variation,
        });
        for h in self.hooks.lock().unwrap().iter() {
            (h.on_tracking_fired)(event.clone());
        }
    }

    pub fn installed_hook_count(&self) -> usize {
        self.hooks.lock().unwrap().len()
    }
}

#[async_trait]
impl SdkConnector for MockSdk {
    fn version(&self) -> String {
        self.version.clone()
    }

    fn client_key(&self) -> Option<String> {
        self.client_key.clone()
    }

    fn api_host(&self) -> Option<String> {
        self.api_host.clone()
    }

    fn attributes(&self) -> Map<String, Value> {
        self.state.lock().unwrap().attributes.clone()
    }

    fn set_attributes(&self, attrs: Map<String, Value>) {
        self.state.lock().unwrap().attributes = attrs.clone();
        for h in self.hooks.lock().unwrap().iter() {
            (h.on_attributes_changed)(attrs.clone());
        }
    }

    fn supports_attribute_overrides(&self) -> bool {
        self.supports_overrides
    }

    fn set_attribute_overrides(&self, attrs: Map<String, Value>) -> Result<(), SdkError> {
        if !self.supports_overrides {
            return Err(SdkError::VersionMismatch {
                version: self.version.clone(),
                capability: "attribute overrides",
            });
        }
        self.state.lock().unwrap().attribute_overrides = attrs;
        Ok(())
    }

    fn features(&self) -> Map<String, Value> {
        self.state.lock().unwrap().features.clone()
    }

    fn experiments(&self) -> Vec<Value> {
        self.state.lock().unwrap().experiments.clone()
    }

    fn forced_features(&self) -> Map<String, Value> {
        self.state.lock().unwrap().forced_features.clone()
    }

    fn set_forced_features(&self, forces: Map<String, Value>) {
        self.state.lock().unwrap().forced_features = forces;
    }

    fn forced_variations(&self) -> Map<String, Value> {
        self.state.lock().unwrap().forced_variations.clone()
    }

    fn set_forced_variations(&self, forces: Map<String, Value>) {
        self.state.lock().unwrap().forced_variations = forces;
    }

    async fn refresh(&self) -> Result<(), SdkError> {
        if let Some(msg) = self.refresh_error.lock().unwrap().clone() {
            return Err(SdkError::Refresh(msg));
        }
        self.state.lock().unwrap().refresh_count += 1;
        Ok(())
    }

    fn install_hooks(&self, hooks: SdkHooks) {
        self.hooks.lock().unwrap().push(hooks);
    }
}
