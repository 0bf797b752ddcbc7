use crate::AppContext;
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabClosedParams {
    tab_id: String,
}

pub async fn closed(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: TabClosedParams = serde_json::from_value(params)?;
    ctx.relay.tab_closed(&p.tab_id).await;
    Ok(json!({ "ok": true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabNavigatedParams {
    tab_id: String,
    url: String,
}

pub async fn navigated(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: TabNavigatedParams = serde_json::from_value(params)?;
    ctx.relay.tab_navigated(&p.tab_id, &p.url).await;
    Ok(json!({ "ok": true }))
}
