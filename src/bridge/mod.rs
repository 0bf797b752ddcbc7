//! The page bridge — runs in the inspected page's own context.
//!
//! Waits (bounded) for the page-global SDK instance, pushes full state
//! snapshots to the extension side, observes page-initiated mutations via
//! the SDK's observer hooks, and translates inbound control messages into
//! calls on the live instance. Errors become `GB_ERROR` messages; nothing
//! here is allowed to panic into the host page.

pub mod content;
pub mod health;
pub mod transport;

use crate::config::DaemonConfig;
use crate::relay::StateRelay;
use crate::sdk::{SdkConnector, SdkError, SdkHooks, SdkSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use transport::{BridgeMessage, ControlMessage, PageSide, TabStateUpdate};

/// Default bounded wait for the SDK global to appear.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// The slot the host page fills when the SDK global becomes available.
/// A watch update doubles as the "loaded" event for late initializers.
pub type SdkSlot = watch::Receiver<Option<Arc<dyn SdkConnector>>>;

pub fn sdk_slot() -> (watch::Sender<Option<Arc<dyn SdkConnector>>>, SdkSlot) {
    watch::channel(None)
}

/// Wire a freshly attached page into the relay: spawns the per-tab content
/// relay and a bridge tuned from daemon config. Returns the slot sender the
/// host page fills once its SDK global appears.
pub fn attach_page(
    config: &DaemonConfig,
    relay: StateRelay,
    tab_id: &str,
    page_url: &str,
) -> watch::Sender<Option<Arc<dyn SdkConnector>>> {
    let (page, ext) = transport::window_channel(page_origin(page_url));
    let (slot_tx, slot) = sdk_slot();
    tokio::spawn(content::run(tab_id.to_string(), ext, relay));
    let bridge = PageBridge::new(page, slot, page_url)
        .with_discovery_timeout(config.sdk_discovery_timeout())
        .with_api_host_fallback(&config.bridge.api_host_fallback);
    tokio::spawn(bridge.run());
    slot_tx
}

/// Origin of a page URL: scheme plus authority, no path.
fn page_origin(url: &str) -> &str {
    let Some(scheme_end) = url.find("://") else {
        return url;
    };
    match url[scheme_end + 3..].find('/') {
        Some(path) => &url[..scheme_end + 3 + path],
        None => url,
    }
}

/// Page-initiated SDK activity observed through the installed hooks.
#[derive(Debug)]
enum HookEvent {
    AttributesChanged(serde_json::Map<String, serde_json::Value>),
    TrackingFired(serde_json::Value),
}

pub struct PageBridge {
    transport: PageSide,
    slot: SdkSlot,
    page_url: String,
    discovery_timeout: Duration,
    api_host_fallback: String,
    http: reqwest::Client,
    hook_tx: mpsc::UnboundedSender<HookEvent>,
    hook_rx: mpsc::UnboundedReceiver<HookEvent>,
    /// Idempotent patch guard — hooks are installed at most once per
    /// bridge/instance pairing, no matter how often discovery re-fires.
    hooks_installed: bool,
}

impl PageBridge {
    pub fn new(transport: PageSide, slot: SdkSlot, page_url: &str) -> Self {
        let (hook_tx, hook_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            slot,
            page_url: page_url.to_string(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            api_host_fallback: health::DEFAULT_API_HOST.to_string(),
            http: reqwest::Client::new(),
            hook_tx,
            hook_rx,
            hooks_installed: false,
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_api_host_fallback(mut self, host: &str) -> Self {
        self.api_host_fallback = host.to_string();
        self
    }

    /// Drive the bridge until the extension side goes away.
    pub async fn run(mut self) {
        // Bounded discovery wait: report "SDK not found" after the window
        // elapses, then keep listening for a late loaded event rather than
        // giving up entirely.
        let sdk = match tokio::time::timeout(self.discovery_timeout, wait_for_sdk(&mut self.slot))
            .await
        {
            Ok(Some(sdk)) => sdk,
            Ok(None) => return,
            Err(_) => {
                info!(url = %self.page_url, "no SDK instance within discovery window");
                self.transport.send(&BridgeMessage::SdkUpdated {
                    data: SdkSnapshot::not_found(),
                });
                match wait_for_sdk(&mut self.slot).await {
                    Some(sdk) => sdk,
                    None => return,
                }
            }
        };

        self.install_hooks_once(sdk.as_ref());
        self.push_snapshot(sdk.as_ref()).await;

        loop {
            enum Input {
                Control(serde_json::Value),
                Hook(HookEvent),
                Closed,
            }
            let input = tokio::select! {
                msg = self.transport.recv() => match msg {
                    Some(raw) => Input::Control(raw),
                    // Extension side torn down.
                    None => Input::Closed,
                },
                event = self.hook_rx.recv() => match event {
                    Some(ev) => Input::Hook(ev),
                    None => Input::Closed,
                },
            };
            match input {
                Input::Control(raw) => self.handle_control(sdk.as_ref(), raw).await,
                Input::Hook(event) => self.handle_hook_event(event),
                Input::Closed => break,
            }
        }
    }

    /// Install observer hooks exactly once per instance. Safe to call
    /// repeatedly; only the first call registers anything.
    pub fn install_hooks_once(&mut self, sdk: &dyn SdkConnector) {
        if self.hooks_installed {
            return;
        }
        let attr_tx = self.hook_tx.clone();
        let track_tx = self.hook_tx.clone();
        sdk.install_hooks(SdkHooks {
            on_attributes_changed: Box::new(move |attrs| {
                let _ = attr_tx.send(HookEvent::AttributesChanged(attrs));
            }),
            on_tracking_fired: Box::new(move |event| {
                let _ = track_tx.send(HookEvent::TrackingFired(event));
            }),
        });
        self.hooks_installed = true;
        debug!("SDK observer hooks installed");
    }

    /// Push a full snapshot: health assessment plus every page-derived
    /// state property.
    pub async fn push_snapshot(&self, sdk: &dyn SdkConnector) {
        let snapshot = health::health_check(sdk, &self.http, &self.api_host_fallback).await;
        self.transport
            .send(&BridgeMessage::SdkUpdated { data: snapshot });

        let updates = [
            ("url", serde_json::Value::String(self.page_url.clone())),
            ("attributes", serde_json::Value::Object(sdk.attributes())),
            ("features", serde_json::Value::Object(sdk.features())),
            ("experiments", serde_json::Value::Array(sdk.experiments())),
            (
                "forcedFeatures",
                serde_json::Value::Object(sdk.forced_features()),
            ),
            (
                "forcedVariations",
                serde_json::Value::Object(sdk.forced_variations()),
            ),
        ];
        for (property, value) in updates {
            self.transport.send(&BridgeMessage::UpdateTabState {
                data: TabStateUpdate {
                    property: property.to_string(),
                    value,
                    append: false,
                },
            });
        }
    }

    async fn handle_control(&self, sdk: &dyn SdkConnector, raw: serde_json::Value) {
        let msg: ControlMessage = match serde_json::from_value(raw) {
            Ok(m) => m,
            Err(e) => {
                // Malformed payloads are reported, never applied.
                self.send_error(format!("malformed control message: {e}"));
                return;
            }
        };
        match msg {
            ControlMessage::UpdateAttributes { data } => {
                let serde_json::Value::Object(attrs) = data else {
                    self.send_error("invalid attributes payload: expected an object".to_string());
                    return;
                };
                if !sdk.supports_attribute_overrides() {
                    self.send_error(
                        SdkError::VersionMismatch {
                            version: sdk.version(),
                            capability: "attribute overrides",
                        }
                        .to_string(),
                    );
                    return;
                }
                if let Err(e) = sdk.set_attribute_overrides(attrs) {
                    self.send_error(e.to_string());
                }
            }
            ControlMessage::UpdateFeatures { data } => {
                let serde_json::Value::Object(forces) = data else {
                    self.send_error("invalid feature forces payload: expected an object".to_string());
                    return;
                };
                sdk.set_forced_features(forces);
            }
            ControlMessage::UpdateExperiments { data } => {
                let serde_json::Value::Object(forces) = data else {
                    self.send_error(
                        "invalid variation forces payload: expected an object".to_string(),
                    );
                    return;
                };
                sdk.set_forced_variations(forces);
            }
            ControlMessage::RequestRefresh => match sdk.refresh().await {
                Ok(()) => self.push_snapshot(sdk).await,
                Err(e) => self.send_error(e.to_string()),
            },
        }
    }

    fn handle_hook_event(&self, event: HookEvent) {
        let data = match event {
            HookEvent::AttributesChanged(attrs) => TabStateUpdate {
                property: "attributes".to_string(),
                value: serde_json::Value::Object(attrs),
                append: false,
            },
            HookEvent::TrackingFired(event) => TabStateUpdate {
                property: "logEvents".to_string(),
                value: event,
                append: true,
            },
        };
        self.transport.send(&BridgeMessage::UpdateTabState { data });
    }

    fn send_error(&self, error: String) {
        warn!(error = %error, "bridge error");
        self.transport.send(&BridgeMessage::Error { error });
    }

    #[cfg(test)]
    fn take_hook_events(&mut self) -> Vec<HookEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.hook_rx.try_recv() {
            out.push(ev);
        }
        out
    }
}

async fn wait_for_sdk(slot: &mut SdkSlot) -> Option<Arc<dyn SdkConnector>> {
    loop {
        let current = slot.borrow_and_update().clone();
        if let Some(sdk) = current {
            return Some(sdk);
        }
        // Sender dropped with no SDK — the host page is gone.
        slot.changed().await.ok()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::MockSdk;
    use transport::window_channel;

    #[tokio::test]
    async fn patch_guard_is_idempotent() {
        let (page, _ext) = window_channel("https://example.com");
        let (_slot_tx, slot) = sdk_slot();
        let mut bridge = PageBridge::new(page, slot, "https://example.com/p");
        let sdk = MockSdk::new("1.4.0");

        bridge.install_hooks_once(&sdk);
        bridge.install_hooks_once(&sdk);
        assert_eq!(sdk.installed_hook_count(), 1);

        // One underlying call — exactly one observed tracking event.
        sdk.track("exp-1", 1);
        let events = bridge.take_hook_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], HookEvent::TrackingFired(_)));
    }

    #[test]
    fn page_origin_strips_the_path() {
        assert_eq!(
            page_origin("https://shop.example/cart?x=1"),
            "https://shop.example"
        );
        assert_eq!(page_origin("http://localhost:3000"), "http://localhost:3000");
    }

    #[tokio::test]
    async fn attribute_override_on_old_sdk_reports_version_mismatch() {
        let (page, mut ext) = window_channel("https://example.com");
        let (_slot_tx, slot) = sdk_slot();
        let bridge = PageBridge::new(page, slot, "https://example.com/p");
        let sdk = MockSdk::new("0.9.0").without_override_support();

        bridge
            .handle_control(
                &sdk,
                serde_json::json!({
                    "type": "GB_UPDATE_ATTRIBUTES",
                    "data": { "country": "DE" }
                }),
            )
            .await;

        let raw = ext.recv().await.unwrap();
        assert_eq!(raw["type"], "GB_ERROR");
        let error = raw["error"].as_str().unwrap();
        assert!(error.contains("0.9.0"), "got: {error}");
        assert!(error.contains("attribute overrides"), "got: {error}");
    }

    #[tokio::test]
    async fn malformed_control_payload_is_reported_not_applied() {
        let (page, mut ext) = window_channel("https://example.com");
        let (_slot_tx, slot) = sdk_slot();
        let bridge = PageBridge::new(page, slot, "https://example.com/p");
        let sdk = MockSdk::new("1.4.0");

        bridge
            .handle_control(&sdk, serde_json::json!({ "type": "GB_BOGUS" }))
            .await;
        let raw = ext.recv().await.unwrap();
        assert_eq!(raw["type"], "GB_ERROR");

        bridge
            .handle_control(
                &sdk,
                serde_json::json!({ "type": "GB_UPDATE_FEATURES", "data": [1, 2] }),
            )
            .await;
        let raw = ext.recv().await.unwrap();
        assert_eq!(raw["type"], "GB_ERROR");
        assert!(sdk.forced_features().is_empty());
    }
}
