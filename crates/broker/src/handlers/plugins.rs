//! Plugin lifecycle methods.

use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;

use crate::dispatch::ConnCtx;
use crate::handlers::req_str;
use crate::plugins::PluginMeta;
use crate::rpc::RpcError;
use crate::state::BrokerState;

fn audit_transition(
    state: &BrokerState,
    ctx: &ConnCtx,
    action: &str,
    plugin: &str,
) -> Result<(), RpcError> {
    state.audit.append(
        AuditEvent::new(
            "plugin",
            ctx.actor(),
            action,
            AuditResource::new("plugin", plugin),
        )
        .compliance("lifecycle", Severity::Medium),
    )?;
    Ok(())
}

/// Register plugin manifests submitted by the operator (discovery is
/// metadata-only; no code is loaded into the broker's address space).
pub async fn discover(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let available: Vec<PluginMeta> = serde_json::from_value(
        params.get("plugins").cloned().unwrap_or_else(|| json!([])),
    )
    .map_err(|e| RpcError::invalid_params(format!("plugins: {e}")))?;

    let handles = state.plugins.discover(available);
    audit_transition(state, ctx, "plugin_discover", "*")?;
    Ok(json!({ "plugins": handles }))
}

pub async fn load(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    let handle = state.plugins.load(&id)?;
    audit_transition(state, ctx, "plugin_load", &id)?;
    Ok(serde_json::to_value(handle)?)
}

pub async fn initialize(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    let handle = state.plugins.initialize(&id)?;
    audit_transition(state, ctx, "plugin_initialize", &id)?;
    Ok(serde_json::to_value(handle)?)
}

pub async fn start(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    let handle = state.plugins.start(&id)?;
    audit_transition(state, ctx, "plugin_start", &id)?;
    Ok(serde_json::to_value(handle)?)
}

pub async fn stop(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    let handle = state.plugins.stop(&id)?;
    audit_transition(state, ctx, "plugin_stop", &id)?;
    Ok(serde_json::to_value(handle)?)
}

pub async fn unload(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    let meta = state.plugins.unload(&id)?;
    audit_transition(state, ctx, "plugin_unload", &id)?;
    Ok(serde_json::to_value(meta)?)
}

pub async fn list(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    Ok(json!({ "plugins": state.plugins.list() }))
}

pub async fn status(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    Ok(serde_json::to_value(state.plugins.status(&id)?)?)
}

pub async fn health(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    Ok(json!({ "health": state.plugins.health() }))
}
