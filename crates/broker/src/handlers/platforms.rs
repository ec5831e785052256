//! Platform connector methods.

use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;

use crate::dispatch::ConnCtx;
use crate::handlers::req_str;
use crate::rpc::RpcError;
use crate::state::BrokerState;

pub async fn connect(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let platform = req_str(&params, "platform")?;
    let connector = state.platforms.get(&platform)?;
    connector.connect().await?;

    state.audit.append(
        AuditEvent::new(
            "platform",
            ctx.actor(),
            "platform_connect",
            AuditResource::new("platform", &platform),
        )
        .compliance("lifecycle", Severity::Medium),
    )?;

    Ok(json!({ "platform": platform, "connected": true }))
}

pub async fn disconnect(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let platform = req_str(&params, "platform")?;
    let connector = state.platforms.get(&platform)?;
    connector.disconnect().await?;

    state.audit.append(
        AuditEvent::new(
            "platform",
            ctx.actor(),
            "platform_disconnect",
            AuditResource::new("platform", &platform),
        )
        .compliance("lifecycle", Severity::Medium),
    )?;

    Ok(json!({ "platform": platform, "connected": false }))
}

pub async fn test(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let platform = req_str(&params, "platform")?;
    let connector = state.platforms.get(&platform)?;
    match connector.test().await {
        Ok(()) => Ok(json!({ "platform": platform, "ok": true })),
        Err(e) => Ok(json!({ "platform": platform, "ok": false, "error": e.to_string() })),
    }
}

pub async fn list(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    Ok(json!({ "platforms": state.platforms.platforms() }))
}

pub async fn status(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    Ok(json!({ "statuses": state.platforms.statuses().await }))
}
