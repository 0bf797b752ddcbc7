//! The per-tab content relay: the extension-side end of the window-message
//! boundary.
//!
//! Inbound, it applies bridge messages to the state relay. Outbound, it
//! forwards override writes (and refresh requests) from any UI surface down
//! to the page. Page-derived properties (`attributes`, `features`, …) are
//! never echoed back — only the developer-override properties flow toward
//! the page.

use super::transport::{BridgeMessage, ControlMessage, ExtensionSide};
use crate::ipc::event::Event;
use crate::relay::StateRelay;
use serde_json::Value;
use tracing::{debug, warn};

pub async fn run(tab_id: String, mut ext: ExtensionSide, relay: StateRelay) {
    let mut events = relay.broadcaster().subscribe();
    loop {
        tokio::select! {
            msg = ext.recv() => match msg {
                Some(raw) => handle_bridge_message(&tab_id, raw, &relay).await,
                // Page context torn down (navigation, tab close).
                None => break,
            },
            event = events.recv() => match event {
                Ok(Event::TabStateChanged { tab_id: t, property, value }) if t == tab_id => {
                    if let Some(ctrl) = control_for_property(&property, value) {
                        ext.send(&ctrl);
                    }
                }
                Ok(Event::RefreshRequested { tab_id: t }) if t == tab_id => {
                    ext.send(&ControlMessage::RequestRefresh);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(tab_id = %tab_id, skipped = n, "content relay lagged behind broadcasts");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!(tab_id = %tab_id, "content relay stopped");
}

/// Which state writes propagate into the page, and as what.
fn control_for_property(property: &str, value: Value) -> Option<ControlMessage> {
    match property {
        "attributeOverrides" => Some(ControlMessage::UpdateAttributes { data: value }),
        "forcedFeatures" => Some(ControlMessage::UpdateFeatures { data: value }),
        "forcedVariations" => Some(ControlMessage::UpdateExperiments { data: value }),
        _ => None,
    }
}

async fn handle_bridge_message(tab_id: &str, raw: Value, relay: &StateRelay) {
    let msg: BridgeMessage = match serde_json::from_value(raw) {
        Ok(m) => m,
        Err(e) => {
            // Validation failure: logged and dropped.
            warn!(tab_id = %tab_id, err = %e, "malformed bridge message dropped");
            return;
        }
    };
    match msg {
        BridgeMessage::SdkUpdated { data } => {
            let value = serde_json::to_value(&data).unwrap_or(Value::Null);
            if let Err(e) = relay
                .set_state("sdkHealth", value, Some(tab_id), false, false)
                .await
            {
                warn!(tab_id = %tab_id, err = %e, "sdk snapshot rejected");
            }
        }
        BridgeMessage::Error { error } => {
            warn!(tab_id = %tab_id, error = %error, "bridge reported error");
            relay.broadcaster().publish(Event::SdkError {
                tab_id: tab_id.to_string(),
                error,
            });
        }
        BridgeMessage::UpdateTabState { data } => {
            if let Err(e) = relay
                .set_state(&data.property, data.value, Some(tab_id), false, data.append)
                .await
            {
                warn!(tab_id = %tab_id, property = %data.property, err = %e,
                      "bridge state update rejected");
            }
        }
    }
}
