//! Thin pass-through to the vendor management API.
//!
//! Bearer-token auth, no retries, no caching. Callers own error
//! presentation — a failed call surfaces as an inline banner, never as a
//! crash.

use anyhow::Result;
use serde_json::Value;

pub struct ApiClient {
    host: String,
    token: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(host: &str, token: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{}", self.host, path.trim_start_matches('/'));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("request failed");
            anyhow::bail!("API error {status}: {message}");
        }
        Ok(body)
    }

    /// Resolve the organization id for the configured token. The result is
    /// cached by the caller in global state (`orgId`), not here.
    pub async fn organization_id(&self) -> Result<Option<String>> {
        let body = self.get_json("api/v1/organizations").await?;
        Ok(body["organizations"]
            .as_array()
            .and_then(|orgs| orgs.first())
            .and_then(|org| org["id"].as_str())
            .map(String::from))
    }
}
