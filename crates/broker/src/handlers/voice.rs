//! Voice session methods. Errors use the dedicated −32000…−32007 range.

use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;

use crate::dispatch::ConnCtx;
use crate::handlers::{bound_session, opt_str, req_str};
use crate::rpc::RpcError;
use crate::state::BrokerState;

pub async fn start(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let session_id = bound_session(ctx)?;
    let room_id = opt_str(&params, "room_id");

    let (session, ice_servers) = state.voice.start(&session_id, room_id)?;

    state.audit.append(
        AuditEvent::new(
            "voice",
            ctx.actor(),
            "voice_start",
            AuditResource::new("voice_session", &session.id),
        )
        .compliance("access", Severity::Medium),
    )?;

    Ok(json!({ "session": session, "ice_servers": ice_servers }))
}

pub async fn end(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let session_id = bound_session(ctx)?;
    let voice_id = req_str(&params, "voice_id")?;

    let session = state.voice.end(&voice_id, &session_id)?;

    state.audit.append(
        AuditEvent::new(
            "voice",
            ctx.actor(),
            "voice_end",
            AuditResource::new("voice_session", &voice_id),
        )
        .compliance("access", Severity::Low),
    )?;

    Ok(json!({ "ended": session.id }))
}

pub async fn ice_servers(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let session_id = bound_session(ctx)?;
    let voice_id = req_str(&params, "voice_id")?;
    let servers = state.voice.ice_servers(&voice_id, &session_id)?;
    Ok(json!({ "ice_servers": servers }))
}

pub async fn candidate(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let session_id = bound_session(ctx)?;
    let voice_id = req_str(&params, "voice_id")?;
    let count = state
        .voice
        .add_candidate(&voice_id, &session_id, params["candidate"].clone())?;
    Ok(json!({ "candidates": count }))
}

pub async fn list(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    let session_id = bound_session(ctx)?;
    Ok(json!({ "sessions": state.voice.list(&session_id) }))
}

/// Audit slice for one voice session.
pub async fn audit(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let voice_id = req_str(&params, "voice_id")?;
    let entries = state.audit.query(100, |e| {
        e.resource.resource_type == "voice_session" && e.resource.id == voice_id
    });
    Ok(json!({ "entries": entries }))
}
