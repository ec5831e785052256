//! Container lifecycle over RPC.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;
use wb_inject::SecretPayload;

use crate::dispatch::ConnCtx;
use crate::handlers::{bound_session, opt_str, req_str};
use crate::rpc::RpcError;
use crate::state::BrokerState;

/// Start an agent container: decrypt the credential, create the
/// container against the image policy, then deliver the secret over the
/// per-container socket. The delivery waits for the agent in the
/// background; the response returns as soon as the container exists.
pub async fn start(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let session_id = bound_session(ctx)?;
    let credential_id = req_str(&params, "key_id")?;
    let image = opt_str(&params, "image");

    let session = state.zerotrust.sessions().get(&session_id)?;

    // Decrypt first: a missing or tampered credential must fail before
    // any container exists.
    let credential = state.keystore.get_credential(&credential_id)?;
    let plaintext = credential
        .plaintext
        .as_ref()
        .map(|p| p.expose().to_string())
        .unwrap_or_default();

    let tracked = state
        .containers
        .create_agent_container(&session_id, &credential_id, session.trust, image.as_deref())
        .await?;

    state.audit.append(
        AuditEvent::new(
            "container",
            ctx.actor(),
            "container_start",
            AuditResource::new("container", &tracked.container_id),
        )
        .detail(json!({
            "credential_id": credential_id,
            "session_id": session_id,
        }))
        .compliance("lifecycle", Severity::Medium),
    )?;

    // Secret delivery: memory-only, one connection, torn down after.
    let payload = SecretPayload {
        request_id: Uuid::new_v4().to_string(),
        skill_id: format!("llm:{}", credential.provider),
        variables: HashMap::from([("api_key".to_string(), plaintext)]),
        expires_at: Utc::now() + Duration::minutes(5),
    };
    let socket_path = state.injector.socket_path(&tracked.container_id);
    {
        let injector = state.injector.clone();
        let audit = state.audit.clone();
        let actor = ctx.actor();
        let container_id = tracked.container_id.clone();
        tokio::spawn(async move {
            let delivered = injector.deliver(&container_id, &payload).await;
            let (action, severity) = match &delivered {
                Ok(()) => ("secret_delivered", Severity::Medium),
                Err(_) => ("secret_delivery_failed", Severity::Critical),
            };
            if let Err(e) = audit.append(
                AuditEvent::new(
                    "inject",
                    actor,
                    action,
                    AuditResource::new("container", &container_id),
                )
                .compliance("security", severity),
            ) {
                tracing::error!(error = %e, "failed to audit secret delivery");
            }
            if let Err(e) = delivered {
                tracing::error!(container = %container_id, error = %e, "secret delivery failed");
            }
        });
    }

    Ok(json!({
        "container_id": tracked.container_id,
        "state": tracked.state,
        "secret_socket": socket_path.display().to_string(),
    }))
}

pub async fn stop(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let container_id = req_str(&params, "container_id")?;
    state.containers.stop_container(&container_id).await?;

    state.audit.append(
        AuditEvent::new(
            "container",
            ctx.actor(),
            "container_stop",
            AuditResource::new("container", &container_id),
        )
        .compliance("lifecycle", Severity::Medium),
    )?;

    Ok(json!({ "status": "stopped", "container_id": container_id }))
}

pub async fn status(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    let stats = state.containers.stats();
    let containers: Vec<Value> = state
        .containers
        .list()
        .into_iter()
        .map(|c| {
            json!({
                "container_id": c.container_id,
                "session_id": c.session_id,
                "state": c.state,
                "created_at": c.created_at,
                "last_active": c.last_active,
                "labels": c.labels,
            })
        })
        .collect();
    Ok(json!({ "stats": stats, "containers": containers }))
}

/// Liveness signal from a running agent.
pub async fn heartbeat(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let container_id = req_str(&params, "container_id")?;
    let last_active = state.containers.ttl().heartbeat(&container_id)?;
    Ok(json!({ "container_id": container_id, "last_active": last_active }))
}
