//! The window-message protocol between the page context and the extension
//! side, modeled as an origin-scoped duplex channel.
//!
//! Stands in for `window.postMessage`: every message carries its sender
//! origin and both ends silently drop anything whose origin does not match
//! their own (same-origin only). Per-sender FIFO comes from the underlying
//! mpsc channel; nothing is guaranteed across senders.

use crate::sdk::SdkSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Control messages the extension side sends into the page context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "GB_UPDATE_ATTRIBUTES")]
    UpdateAttributes { data: Value },
    #[serde(rename = "GB_UPDATE_FEATURES")]
    UpdateFeatures { data: Value },
    #[serde(rename = "GB_UPDATE_EXPERIMENTS")]
    UpdateExperiments { data: Value },
    #[serde(rename = "GB_REQUEST_REFRESH")]
    RequestRefresh,
}

/// Messages the page bridge emits toward the extension side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "GB_SDK_UPDATED")]
    SdkUpdated { data: SdkSnapshot },
    #[serde(rename = "GB_ERROR")]
    Error { error: String },
    #[serde(rename = "UPDATE_TAB_STATE")]
    UpdateTabState { data: TabStateUpdate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabStateUpdate {
    pub property: String,
    pub value: Value,
    #[serde(default)]
    pub append: bool,
}

/// A window message tagged with its sender origin.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: String,
    pub data: Value,
}

/// Build both ends of the page/extension boundary for one origin.
pub fn window_channel(origin: &str) -> (PageSide, ExtensionSide) {
    let (to_ext, from_page) = mpsc::unbounded_channel();
    let (to_page, from_ext) = mpsc::unbounded_channel();
    (
        PageSide {
            origin: origin.to_string(),
            tx: to_ext,
            rx: from_ext,
        },
        ExtensionSide {
            origin: origin.to_string(),
            tx: to_page,
            rx: from_page,
        },
    )
}

/// The page-context end: sends [`BridgeMessage`]s, receives
/// [`ControlMessage`]s (as raw JSON — validation happens in the bridge).
pub struct PageSide {
    origin: String,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

/// The extension end held by the per-tab content relay.
pub struct ExtensionSide {
    origin: String,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

macro_rules! side_impl {
    ($side:ident) => {
        impl $side {
            /// Post a message. A closed peer means that context was torn
            /// down — the message is silently dropped, no retry.
            pub fn send<T: Serialize>(&self, msg: &T) {
                let data = match serde_json::to_value(msg) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(err = %e, "unserializable window message dropped");
                        return;
                    }
                };
                let _ = self.tx.send(Envelope {
                    origin: self.origin.clone(),
                    data,
                });
            }

            /// Post raw JSON claiming an arbitrary origin. Used by tests to
            /// simulate foreign frames; the receiver drops mismatches.
            pub fn send_from_origin(&self, origin: &str, data: Value) {
                let _ = self.tx.send(Envelope {
                    origin: origin.to_string(),
                    data,
                });
            }

            /// Receive the next same-origin message; cross-origin messages
            /// are dropped. `None` means the peer is gone.
            pub async fn recv(&mut self) -> Option<Value> {
                loop {
                    let env = self.rx.recv().await?;
                    if env.origin == self.origin {
                        return Some(env.data);
                    }
                    debug!(origin = %env.origin, "dropping cross-origin window message");
                }
            }
        }
    };
}

side_impl!(PageSide);
side_impl!(ExtensionSide);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_messages_use_the_documented_wire_tags() {
        let msg = ControlMessage::UpdateAttributes {
            data: json!({"id": "u1"}),
        };
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "GB_UPDATE_ATTRIBUTES");
        assert_eq!(
            serde_json::to_value(ControlMessage::RequestRefresh).unwrap(),
            json!({"type": "GB_REQUEST_REFRESH"})
        );

        let parsed: BridgeMessage = serde_json::from_value(json!({
            "type": "UPDATE_TAB_STATE",
            "data": { "property": "logEvents", "value": {"msg": "x"}, "append": true }
        }))
        .unwrap();
        match parsed {
            BridgeMessage::UpdateTabState { data } => {
                assert_eq!(data.property, "logEvents");
                assert!(data.append);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cross_origin_messages_are_dropped() {
        let (page, mut ext) = window_channel("https://example.com");
        page.send_from_origin("https://evil.test", json!({"type": "GB_ERROR", "error": "x"}));
        page.send(&BridgeMessage::Error {
            error: "real".to_string(),
        });
        let got = ext.recv().await.unwrap();
        assert_eq!(got["error"], "real");
    }

    #[tokio::test]
    async fn messages_from_one_sender_arrive_in_order() {
        let (page, mut ext) = window_channel("https://example.com");
        for i in 0..10 {
            page.send(&BridgeMessage::UpdateTabState {
                data: TabStateUpdate {
                    property: "logEvents".to_string(),
                    value: json!(i),
                    append: true,
                },
            });
        }
        for i in 0..10 {
            let got = ext.recv().await.unwrap();
            assert_eq!(got["data"]["value"], json!(i));
        }
    }
}
