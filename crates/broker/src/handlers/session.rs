//! Session identification and MFA.

use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;
use wb_zerotrust::FingerprintInput;

use crate::dispatch::ConnCtx;
use crate::handlers::{bound_session, opt_str, req_str};
use crate::rpc::RpcError;
use crate::state::BrokerState;

/// Bind this connection to a session: resolve the submitted fingerprint
/// to a device (registering it on first contact) and mint a session.
pub async fn identify(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let user_id = req_str(&params, "user_id")?;
    let ip = opt_str(&params, "ip").unwrap_or_else(|| "local".into());
    let fingerprint: FingerprintInput =
        serde_json::from_value(params["fingerprint"].clone())
            .map_err(|e| RpcError::invalid_params(format!("fingerprint: {e}")))?;

    let (session, device, is_new_device) =
        state.zerotrust.identify(&user_id, &fingerprint, &ip)?;

    *ctx.session_id.write() = Some(session.session_id.clone());
    *ctx.user_id.write() = Some(user_id.clone());
    *ctx.ip.write() = ip;

    state.audit.append(
        AuditEvent::new(
            "session",
            ctx.actor(),
            "session_identify",
            AuditResource::new("session", &session.session_id),
        )
        .detail(json!({
            "device_id": device.device_id,
            "new_device": is_new_device,
        }))
        .compliance("access", Severity::Low),
    )?;

    Ok(json!({
        "session_id": session.session_id,
        "device_id": device.device_id,
        "new_device": is_new_device,
        "device_verified": device.is_verified(),
    }))
}

/// Record a completed MFA challenge on the bound session.
pub async fn mfa(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    let session_id = bound_session(ctx)?;
    let session = state.zerotrust.record_mfa(&session_id)?;

    state.audit.append(
        AuditEvent::new(
            "session",
            ctx.actor(),
            "mfa_confirmed",
            AuditResource::new("session", &session_id),
        )
        .compliance("security", Severity::Medium),
    )?;

    Ok(json!({ "session_id": session.session_id, "mfa": true }))
}

/// Invalidate the bound session.
pub async fn logout(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    let session_id = bound_session(ctx)?;
    state.zerotrust.sessions().remove(&session_id)?;
    *ctx.session_id.write() = None;

    state.audit.append(
        AuditEvent::new(
            "session",
            ctx.actor(),
            "session_logout",
            AuditResource::new("session", &session_id),
        )
        .compliance("access", Severity::Low),
    )?;

    Ok(json!({ "logged_out": true }))
}
