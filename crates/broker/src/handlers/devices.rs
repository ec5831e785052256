//! Device verification workflow.

use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;
use wb_zerotrust::VerificationMethod;

use crate::dispatch::ConnCtx;
use crate::handlers::{opt_str, req_str};
use crate::rpc::RpcError;
use crate::state::BrokerState;

/// Open a verification request for a device (typically the caller's
/// own, freshly registered one).
pub async fn verify_request(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let device_id = req_str(&params, "device_id")?;
    let method: VerificationMethod = serde_json::from_value(
        params
            .get("method")
            .cloned()
            .unwrap_or_else(|| json!("admin_approval")),
    )
    .map_err(|e| RpcError::invalid_params(format!("method: {e}")))?;

    let request = state.zerotrust.request_verification(&device_id, method)?;

    state.audit.append(
        AuditEvent::new(
            "device",
            ctx.actor(),
            "verification_requested",
            AuditResource::new("device", &device_id),
        )
        .detail(json!({ "request_id": request.id, "method": method }))
        .compliance("security", Severity::Medium),
    )?;

    Ok(serde_json::to_value(request)?)
}

pub async fn verify_approve(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let request_id = req_str(&params, "request_id")?;
    let approver = ctx
        .user_id
        .read()
        .clone()
        .unwrap_or_else(|| "admin".into());
    let reason = opt_str(&params, "reason");

    let device = state
        .zerotrust
        .approve_verification(&request_id, &approver, reason)?;

    state.audit.append(
        AuditEvent::new(
            "device",
            ctx.actor(),
            "verification_approved",
            AuditResource::new("device", &device.device_id),
        )
        .compliance("security", Severity::High),
    )?;

    Ok(json!({
        "device_id": device.device_id,
        "verified": device.is_verified(),
        "trust": device.trust,
    }))
}

pub async fn verify_reject(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let request_id = req_str(&params, "request_id")?;
    let decider = ctx
        .user_id
        .read()
        .clone()
        .unwrap_or_else(|| "admin".into());

    let device = state.zerotrust.reject_verification(&request_id, &decider)?;

    state.audit.append(
        AuditEvent::new(
            "device",
            ctx.actor(),
            "verification_rejected",
            AuditResource::new("device", &device.device_id),
        )
        .compliance("security", Severity::High),
    )?;

    Ok(json!({
        "device_id": device.device_id,
        "verified": false,
        "failed_verifications": device.failed_verifications,
    }))
}

pub async fn list(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let user = opt_str(&params, "user_id");
    let devices = state.zerotrust.devices().list(user.as_deref());
    let pending = state.zerotrust.list_pending_verifications();
    Ok(json!({ "devices": devices, "pending_requests": pending }))
}
