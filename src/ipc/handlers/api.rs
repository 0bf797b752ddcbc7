//! Management-API pass-through.
//!
//! Credentials come from persisted global state (`apiHost`/`apiKey`) when a
//! UI surface has set them, falling back to the `[api]` config bootstrap.

use crate::api::ApiClient;
use crate::AppContext;
use anyhow::Result;
use serde_json::{json, Value};

async fn global_text(ctx: &AppContext, property: &str) -> Option<String> {
    ctx.relay
        .get_state(property, None, true)
        .await
        .and_then(|v| v.as_str().map(String::from))
}

/// Resolve the organization id for the configured credentials and cache it
/// in persisted global state as `orgId`.
pub async fn org_id(_params: Value, ctx: &AppContext) -> Result<Value> {
    let host = global_text(ctx, "apiHost")
        .await
        .unwrap_or_else(|| ctx.config.api.host.clone());
    let token = global_text(ctx, "apiKey")
        .await
        .unwrap_or_else(|| ctx.config.api.token.clone());
    if token.is_empty() {
        // No credentials — not an error, just nothing to resolve.
        return Ok(json!({ "orgId": Value::Null }));
    }

    let client = ApiClient::new(&host, &token);
    let org = client.organization_id().await?;
    if let Some(id) = &org {
        ctx.relay
            .set_state("orgId", json!(id), None, true, false)
            .await?;
    }
    Ok(json!({ "orgId": org }))
}
