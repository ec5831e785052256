//! License methods.

use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;

use crate::dispatch::ConnCtx;
use crate::handlers::req_str;
use crate::rpc::RpcError;
use crate::state::BrokerState;

pub async fn validate(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let key = req_str(&params, "key")?;
    match state.license.validate(&key) {
        Ok(status) => Ok(serde_json::to_value(status)?),
        Err(e) => Ok(json!({ "valid": false, "error": e.to_string() })),
    }
}

pub async fn status(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    Ok(serde_json::to_value(state.license.status())?)
}

pub async fn features(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    Ok(json!({ "features": state.license.features() }))
}

pub async fn set_key(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let key = req_str(&params, "key")?;
    let status = state.license.set_key(&key)?;

    state.audit.append(
        AuditEvent::new(
            "license",
            ctx.actor(),
            "license_set_key",
            AuditResource::new("license", "key"),
        )
        .detail(json!({ "tier": status.tier }))
        .compliance("lifecycle", Severity::Medium),
    )?;

    Ok(serde_json::to_value(status)?)
}
