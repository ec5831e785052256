//! Method registry and request dispatch.
//!
//! Every registered method carries an enforcement-policy name; the
//! policy middleware runs before the handler and a denial produces the
//! structured error plus exactly one audit entry. Handler panics are
//! trapped and surfaced as internal errors.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;

use wb_audit::{AuditActor, AuditEvent, AuditResource};
use wb_domain::types::Severity;

use crate::handlers;
use crate::rpc::{
    RpcError, RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_REQUEST, METHOD_NOT_FOUND,
    POLICY_DENIED,
};
use crate::state::BrokerState;

/// Per-connection context. One connection serves one identified session
/// at a time; requests before `session_identify` may only call methods
/// with no policy.
pub struct ConnCtx {
    pub session_id: RwLock<Option<String>>,
    pub user_id: RwLock<Option<String>>,
    /// Caller-attested origin IP ("local" for direct socket clients).
    pub ip: RwLock<String>,
}

impl ConnCtx {
    pub fn new() -> Self {
        Self {
            session_id: RwLock::new(None),
            user_id: RwLock::new(None),
            ip: RwLock::new("local".into()),
        }
    }

    pub fn session(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn actor(&self) -> AuditActor {
        AuditActor::user(
            self.user_id.read().clone().unwrap_or_else(|| "anonymous".into()),
            Some(self.ip.read().clone()),
        )
    }
}

impl Default for ConnCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed method registry: `(method, enforcement policy)`. An empty
/// policy means the method is reachable before identification (it is
/// either the identification step itself or gated another way, like
/// one-time tokens).
pub const METHODS: &[(&str, &str)] = &[
    // session & devices
    ("session_identify", ""),
    ("session_mfa", ""),
    ("session_logout", ""),
    ("device_verify_request", ""),
    ("device_verify_approve", "admin_access"),
    ("device_verify_reject", "admin_access"),
    ("device_list", "admin_access"),
    // credentials & tokens
    ("credential_store", "key_management"),
    ("credential_list", "key_management"),
    ("credential_get", "secret_access"),
    ("credential_delete", "key_management"),
    ("token_generate", "secret_access"),
    ("token_submit", ""),
    // containers
    ("container_start", "container_create"),
    ("container_stop", "container_create"),
    ("container_status", "status_read"),
    ("container_heartbeat", "status_read"),
    // matrix & bridging
    ("matrix_login", "config_change"),
    ("matrix_refresh", "config_change"),
    ("matrix_send", "message_send"),
    ("matrix_receive", "message_receive"),
    ("matrix_status", "status_read"),
    ("bridge_link", "config_change"),
    ("bridge_unlink", "config_change"),
    ("bridge_links", "status_read"),
    ("bridge_capabilities", "status_read"),
    // config attachments
    ("config_attach", "config_change"),
    // voice
    ("voice_start", "voice_session"),
    ("voice_end", "voice_session"),
    ("voice_ice_servers", "voice_session"),
    ("voice_candidate", "voice_session"),
    ("voice_list", "voice_session"),
    ("voice_audit", "audit_read"),
    // recovery
    ("recovery_generate", "recovery"),
    ("recovery_store", "recovery"),
    ("recovery_verify", "recovery"),
    ("recovery_complete", "recovery"),
    // platforms
    ("platform_connect", "platform_manage"),
    ("platform_disconnect", "platform_manage"),
    ("platform_test", "platform_manage"),
    ("platform_list", "status_read"),
    ("platform_status", "status_read"),
    // plugins
    ("plugin_discover", "plugin_manage"),
    ("plugin_load", "plugin_manage"),
    ("plugin_initialize", "plugin_manage"),
    ("plugin_start", "plugin_manage"),
    ("plugin_stop", "plugin_manage"),
    ("plugin_unload", "plugin_manage"),
    ("plugin_list", "status_read"),
    ("plugin_status", "status_read"),
    ("plugin_health", "status_read"),
    // license
    ("license_validate", "status_read"),
    ("license_status", "status_read"),
    ("license_features", "status_read"),
    ("license_set_key", "license_manage"),
    // errors & audit
    ("error_query", "status_read"),
    ("error_resolve", "status_read"),
    ("audit_verify", "audit_read"),
    ("audit_export", "audit_read"),
];

/// Policy name for a registered method, `None` when unregistered.
pub fn policy_for(method: &str) -> Option<&'static str> {
    METHODS
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, policy)| *policy)
}

/// Process one request on a connection. Always yields a response.
pub async fn handle_request(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    req: RpcRequest,
) -> RpcResponse {
    let id = req.id.clone();

    if req.jsonrpc != "2.0" {
        return RpcResponse::err(
            id,
            RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""),
        );
    }

    let Some(policy) = policy_for(&req.method) else {
        return RpcResponse::err(
            id,
            RpcError::new(METHOD_NOT_FOUND, format!("unknown method '{}'", req.method)),
        );
    };

    // ── policy middleware ───────────────────────────────────────────
    if !policy.is_empty() {
        if let Some(denied) = enforce(state, ctx, &req.method, policy).await {
            let response_error = denied.clone();
            record_error(state, &req.method, &denied);
            return RpcResponse::err(id, response_error);
        }
    }

    // ── dispatch (panics trapped) ───────────────────────────────────
    let outcome = AssertUnwindSafe(route(state, ctx, &req.method, req.params))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(result)) => RpcResponse::ok(id, result),
        Ok(Err(error)) => {
            record_error(state, &req.method, &error);
            RpcResponse::err(id, error)
        }
        Err(_panic) => {
            tracing::error!(method = %req.method, "handler panicked");
            let error = RpcError::new(INTERNAL_ERROR, "internal error").with_data(
                serde_json::json!({ "code": "INT-500" }),
            );
            record_error(state, &req.method, &error);
            RpcResponse::err(id, error)
        }
    }
}

/// Run the policy middleware. Returns the denial error, if any, having
/// written its audit entry.
async fn enforce(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    method: &str,
    policy: &str,
) -> Option<RpcError> {
    let Some(session_id) = ctx.session() else {
        return Some(
            RpcError::new(POLICY_DENIED, "no session bound to this connection").with_data(
                serde_json::json!({
                    "code": "AUT-403",
                    "required_actions": ["session_identify"],
                }),
            ),
        );
    };

    let ip = ctx.ip.read().clone();
    let decision = match state.zerotrust.authorize(&session_id, policy, &ip) {
        Ok(decision) => decision,
        Err(e) => return Some(e.into()),
    };

    if decision.allowed {
        return None;
    }

    // Exactly one audit entry per denial.
    let reason = decision
        .reason
        .clone()
        .unwrap_or_else(|| "denied by policy".into());
    if let Err(e) = state.audit.append(
        AuditEvent::new(
            "policy",
            ctx.actor(),
            "policy_denied",
            AuditResource::new("method", method),
        )
        .detail(serde_json::json!({
            "policy": policy,
            "reason": reason,
            "risk": decision.risk,
            "trust": decision.trust,
            "anomalies": decision.anomalies,
        }))
        .compliance("security", Severity::Medium),
    ) {
        tracing::error!(error = %e, "failed to audit a policy denial");
    }

    let mut data = serde_json::json!({
        "code": "AUT-403",
        "required_actions": decision.required_actions,
        "risk": decision.risk,
        "trust": decision.trust,
    });
    if let Some(until) = decision.locked_until {
        data["locked_until"] = serde_json::json!(until);
    }
    Some(RpcError::new(POLICY_DENIED, reason).with_data(data))
}

fn record_error(state: &Arc<BrokerState>, method: &str, error: &RpcError) {
    let stable = error
        .data
        .as_ref()
        .and_then(|d| d["code"].as_str())
        .unwrap_or("DWN-502")
        .to_string();
    let category = stable.split('-').next().unwrap_or("DWN").to_string();
    state
        .errors
        .record(method, &category, &stable, &error.message);
}

/// Route to the responsible handler.
async fn route(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    match method {
        // session & devices
        "session_identify" => handlers::session::identify(state, ctx, params).await,
        "session_mfa" => handlers::session::mfa(state, ctx, params).await,
        "session_logout" => handlers::session::logout(state, ctx, params).await,
        "device_verify_request" => handlers::devices::verify_request(state, ctx, params).await,
        "device_verify_approve" => handlers::devices::verify_approve(state, ctx, params).await,
        "device_verify_reject" => handlers::devices::verify_reject(state, ctx, params).await,
        "device_list" => handlers::devices::list(state, ctx, params).await,
        // credentials & tokens
        "credential_store" => handlers::credentials::store(state, ctx, params).await,
        "credential_list" => handlers::credentials::list(state, ctx, params).await,
        "credential_get" => handlers::credentials::get(state, ctx, params).await,
        "credential_delete" => handlers::credentials::delete(state, ctx, params).await,
        "token_generate" => handlers::credentials::token_generate(state, ctx, params).await,
        "token_submit" => handlers::credentials::token_submit(state, ctx, params).await,
        // containers
        "container_start" => handlers::containers::start(state, ctx, params).await,
        "container_stop" => handlers::containers::stop(state, ctx, params).await,
        "container_status" => handlers::containers::status(state, ctx, params).await,
        "container_heartbeat" => handlers::containers::heartbeat(state, ctx, params).await,
        // matrix & bridging
        "matrix_login" => handlers::matrix::login(state, ctx, params).await,
        "matrix_refresh" => handlers::matrix::refresh(state, ctx, params).await,
        "matrix_send" => handlers::matrix::send(state, ctx, params).await,
        "matrix_receive" => handlers::matrix::receive(state, ctx, params).await,
        "matrix_status" => handlers::matrix::status(state, ctx, params).await,
        "bridge_link" => handlers::matrix::bridge_link(state, ctx, params).await,
        "bridge_unlink" => handlers::matrix::bridge_unlink(state, ctx, params).await,
        "bridge_links" => handlers::matrix::bridge_links(state, ctx, params).await,
        "bridge_capabilities" => handlers::matrix::capabilities(state, ctx, params).await,
        // config attachments
        "config_attach" => handlers::attachments::attach(state, ctx, params).await,
        // voice
        "voice_start" => handlers::voice::start(state, ctx, params).await,
        "voice_end" => handlers::voice::end(state, ctx, params).await,
        "voice_ice_servers" => handlers::voice::ice_servers(state, ctx, params).await,
        "voice_candidate" => handlers::voice::candidate(state, ctx, params).await,
        "voice_list" => handlers::voice::list(state, ctx, params).await,
        "voice_audit" => handlers::voice::audit(state, ctx, params).await,
        // recovery
        "recovery_generate" => handlers::recovery::generate(state, ctx, params).await,
        "recovery_store" => handlers::recovery::store(state, ctx, params).await,
        "recovery_verify" => handlers::recovery::verify(state, ctx, params).await,
        "recovery_complete" => handlers::recovery::complete(state, ctx, params).await,
        // platforms
        "platform_connect" => handlers::platforms::connect(state, ctx, params).await,
        "platform_disconnect" => handlers::platforms::disconnect(state, ctx, params).await,
        "platform_test" => handlers::platforms::test(state, ctx, params).await,
        "platform_list" => handlers::platforms::list(state, ctx, params).await,
        "platform_status" => handlers::platforms::status(state, ctx, params).await,
        // plugins
        "plugin_discover" => handlers::plugins::discover(state, ctx, params).await,
        "plugin_load" => handlers::plugins::load(state, ctx, params).await,
        "plugin_initialize" => handlers::plugins::initialize(state, ctx, params).await,
        "plugin_start" => handlers::plugins::start(state, ctx, params).await,
        "plugin_stop" => handlers::plugins::stop(state, ctx, params).await,
        "plugin_unload" => handlers::plugins::unload(state, ctx, params).await,
        "plugin_list" => handlers::plugins::list(state, ctx, params).await,
        "plugin_status" => handlers::plugins::status(state, ctx, params).await,
        "plugin_health" => handlers::plugins::health(state, ctx, params).await,
        // license
        "license_validate" => handlers::license::validate(state, ctx, params).await,
        "license_status" => handlers::license::status(state, ctx, params).await,
        "license_features" => handlers::license::features(state, ctx, params).await,
        "license_set_key" => handlers::license::set_key(state, ctx, params).await,
        // errors & audit
        "error_query" => handlers::errors::query(state, ctx, params).await,
        "error_resolve" => handlers::errors::resolve(state, ctx, params).await,
        "audit_verify" => handlers::audit::verify(state, ctx, params).await,
        "audit_export" => handlers::audit::export(state, ctx, params).await,
        // policy_for() guarantees registration; reaching here is a bug.
        other => Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("unrouted method '{other}'"),
        )),
    }
}
