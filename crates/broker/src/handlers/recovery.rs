//! Recovery phrase methods.

use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;

use crate::dispatch::ConnCtx;
use crate::handlers::req_str;
use crate::rpc::RpcError;
use crate::state::BrokerState;

/// Generate a phrase. The phrase is in this response and nowhere else.
pub async fn generate(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    let phrase = state.recovery.generate();

    state.audit.append(
        AuditEvent::new(
            "recovery",
            ctx.actor(),
            "recovery_generate",
            AuditResource::new("recovery", "phrase"),
        )
        .compliance("security", Severity::Medium),
    )?;

    Ok(json!({ "phrase": phrase, "words": phrase.split_whitespace().count() }))
}

pub async fn store(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let phrase = req_str(&params, "phrase")?;
    state.recovery.store(&phrase)?;

    state.audit.append(
        AuditEvent::new(
            "recovery",
            ctx.actor(),
            "recovery_store",
            AuditResource::new("recovery", "phrase"),
        )
        .compliance("security", Severity::High),
    )?;

    Ok(json!({ "stored": true }))
}

pub async fn verify(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let phrase = req_str(&params, "phrase")?;
    let matches = state.recovery.verify(&phrase)?;

    state.audit.append(
        AuditEvent::new(
            "recovery",
            ctx.actor(),
            "recovery_verify",
            AuditResource::new("recovery", "phrase"),
        )
        .detail(json!({ "matched": matches }))
        .compliance("security", Severity::High),
    )?;

    Ok(json!({ "matched": matches }))
}

pub async fn complete(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    state.recovery.complete()?;

    state.audit.append(
        AuditEvent::new(
            "recovery",
            ctx.actor(),
            "recovery_complete",
            AuditResource::new("recovery", "phrase"),
        )
        .compliance("security", Severity::Medium),
    )?;

    Ok(json!({ "complete": true }))
}
