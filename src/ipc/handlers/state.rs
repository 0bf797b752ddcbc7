//! `getState` / `setState` — the relay's request/response surface.
//!
//! Both are fire-and-forget from the caller's point of view: the JSON-RPC
//! reply is a courtesy, and the authoritative value always arrives through
//! the broadcast stream. A torn-down caller simply never sees its reply.

use crate::ipc::event::Event;
use crate::AppContext;
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetStateParams {
    property: String,
    tab_id: Option<String>,
    #[serde(default)]
    persist: bool,
}

pub async fn get_state(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: GetStateParams = serde_json::from_value(params)?;
    let value = ctx
        .relay
        .get_state(&p.property, p.tab_id.as_deref(), p.persist)
        .await;
    // Absent keys reply with null — not-found is not an error.
    Ok(json!({ "property": p.property, "value": value }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetStateParams {
    property: String,
    #[serde(default)]
    value: Value,
    tab_id: Option<String>,
    #[serde(default)]
    persist: bool,
    #[serde(default)]
    append: bool,
}

pub async fn set_state(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: SetStateParams = serde_json::from_value(params)?;
    ctx.relay
        .set_state(&p.property, p.value, p.tab_id.as_deref(), p.persist, p.append)
        .await?;
    Ok(json!({ "ok": true }))
}

#[derive(Deserialize)]
struct CopyParams {
    value: String,
}

/// Relayed to every surface; whichever one has clipboard access performs
/// the copy.
pub async fn copy_to_clipboard(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: CopyParams = serde_json::from_value(params)?;
    ctx.broadcaster
        .publish(Event::CopyToClipboard { value: p.value });
    Ok(json!({ "ok": true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshParams {
    tab_id: String,
}

pub async fn refresh(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: RefreshParams = serde_json::from_value(params)?;
    ctx.broadcaster
        .publish(Event::RefreshRequested { tab_id: p.tab_id });
    Ok(json!({ "ok": true }))
}
