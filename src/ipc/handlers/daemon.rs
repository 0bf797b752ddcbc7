use crate::AppContext;
use anyhow::Result;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;

pub async fn ping(_params: Value, _ctx: &AppContext) -> Result<Value> {
    Ok(json!({ "pong": true }))
}

pub async fn status(_params: Value, ctx: &AppContext) -> Result<Value> {
    let uptime = ctx.started_at.elapsed().as_secs();
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "daemonId": ctx.daemon_id,
        "uptime": uptime,
        "connectedClients": ctx.connected_clients.load(Ordering::Relaxed),
        "openTabs": ctx.relay.tab_count().await,
        "port": ctx.config.port
    }))
}
