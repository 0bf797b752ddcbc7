//! SDK capability/health probe.
//!
//! Determines API host and client key from the live instance, attempts a
//! direct fetch of the features endpoint, and classifies the result:
//! connectable-with-payload, connectable-without-client-key, or
//! connect-failed-with-server-error-message.

use crate::sdk::{SdkConnector, SdkSnapshot};
use serde_json::Value;

/// Payload endpoint host used when the SDK instance does not expose one.
pub const DEFAULT_API_HOST: &str = "https://cdn.growthbook.io";

pub async fn health_check(
    sdk: &dyn SdkConnector,
    http: &reqwest::Client,
    default_api_host: &str,
) -> SdkSnapshot {
    let version = Some(sdk.version());
    let host = sdk
        .api_host()
        .unwrap_or_else(|| default_api_host.to_string());

    let Some(key) = sdk.client_key() else {
        // API may well be reachable, but without a client key there is
        // nothing to fetch.
        return SdkSnapshot {
            can_connect: false,
            has_payload: false,
            has_client_key: false,
            sdk_found: true,
            version,
            client_key: None,
            error_message: None,
            payload: None,
        };
    };

    let url = format!("{}/api/features/{}", host.trim_end_matches('/'), key);
    match http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
            Ok(body) => {
                let has_payload = body
                    .get("features")
                    .map(|f| f.is_object())
                    .unwrap_or(false);
                SdkSnapshot {
                    can_connect: true,
                    has_payload,
                    has_client_key: true,
                    sdk_found: true,
                    version,
                    client_key: Some(key),
                    error_message: None,
                    payload: has_payload.then_some(body),
                }
            }
            Err(e) => connect_failed(version, key, format!("invalid features response: {e}")),
        },
        Ok(resp) => {
            let status = resp.status();
            // Server error bodies carry a `message` field when they have
            // anything useful to say.
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|b| b.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| format!("features endpoint returned {status}"));
            connect_failed(version, key, message)
        }
        Err(e) => connect_failed(version, key, e.to_string()),
    }
}

fn connect_failed(version: Option<String>, key: String, message: String) -> SdkSnapshot {
    SdkSnapshot {
        can_connect: false,
        has_payload: false,
        has_client_key: true,
        sdk_found: true,
        version,
        client_key: Some(key),
        error_message: Some(message),
        payload: None,
    }
}
