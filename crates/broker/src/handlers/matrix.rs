//! Matrix actions and bridge management over RPC.

use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;
use wb_domain::Error;
use wb_matrix::{MatrixAdapter, RoomLink};

use crate::dispatch::ConnCtx;
use crate::handlers::req_str;
use crate::rpc::RpcError;
use crate::state::BrokerState;

fn adapter(state: &BrokerState) -> Result<&Arc<MatrixAdapter>, RpcError> {
    state
        .matrix
        .as_ref()
        .ok_or_else(|| RpcError::from(Error::Config("no Matrix homeserver configured".into())))
}

pub async fn login(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let password = req_str(&params, "password")?;
    let adapter = adapter(state)?;
    let user_id = adapter.client().login(&password).await?;

    state.audit.append(
        AuditEvent::new(
            "matrix",
            ctx.actor(),
            "matrix_login",
            AuditResource::new("matrix_user", &user_id),
        )
        .compliance("security", Severity::High),
    )?;

    Ok(json!({ "user_id": user_id }))
}

pub async fn refresh(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    let adapter = adapter(state)?;
    adapter.client().refresh().await?;

    state.audit.append(
        AuditEvent::new(
            "matrix",
            ctx.actor(),
            "matrix_refresh",
            AuditResource::new("matrix_user", adapter.client().user_id()),
        )
        .compliance("security", Severity::Medium),
    )?;

    Ok(json!({ "refreshed": true }))
}

/// Send a message into a room. The body passes through the scrubber
/// before it leaves the broker.
pub async fn send(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let room_id = req_str(&params, "room_id")?;
    let body = req_str(&params, "body")?;
    let sender = ctx
        .user_id
        .read()
        .clone()
        .unwrap_or_else(|| "anonymous".into());

    let adapter = adapter(state)?;
    let event_id = adapter.send(&room_id, &body, &sender).await?;

    state.audit.append(
        AuditEvent::new(
            "matrix",
            ctx.actor(),
            "message_send",
            AuditResource::new("room", &room_id),
        )
        .detail(json!({ "event_id": event_id }))
        .compliance("access", Severity::Low),
    )?;

    Ok(json!({ "event_id": event_id }))
}

/// Drain received events from the inbox (filled by the sync loop).
pub async fn receive(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let max = params["max"].as_u64().unwrap_or(50) as usize;
    let mut inbox = state.inbox.write();
    let take = inbox.len().min(max);
    let events: Vec<Value> = inbox
        .drain(..take)
        .map(|e| {
            json!({
                "room_id": e.room_id,
                "event_id": e.event_id,
                "sender": e.sender,
                "body": e.body,
                "origin_server_ts": e.origin_server_ts,
            })
        })
        .collect();
    Ok(json!({ "events": events, "remaining": inbox.len() }))
}

pub async fn status(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    match &state.matrix {
        Some(adapter) => Ok(json!({
            "configured": true,
            "status": adapter.status(),
        })),
        None => Ok(json!({ "configured": false })),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge management
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn bridge(state: &BrokerState) -> Result<&Arc<wb_matrix::BridgeManager>, RpcError> {
    state
        .bridge
        .as_ref()
        .ok_or_else(|| RpcError::from(Error::Config("no Matrix homeserver configured".into())))
}

pub async fn bridge_link(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let link = RoomLink {
        matrix_room: req_str(&params, "matrix_room")?,
        platform: req_str(&params, "platform")?,
        platform_channel: req_str(&params, "platform_channel")?,
    };
    bridge(state)?.link(link.clone())?;

    state.audit.append(
        AuditEvent::new(
            "bridge",
            ctx.actor(),
            "bridge_link",
            AuditResource::new("room", &link.matrix_room),
        )
        .detail(serde_json::to_value(&link)?)
        .compliance("lifecycle", Severity::Medium),
    )?;

    Ok(serde_json::to_value(link)?)
}

pub async fn bridge_unlink(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let platform = req_str(&params, "platform")?;
    let channel = req_str(&params, "platform_channel")?;
    bridge(state)?.unlink(&platform, &channel)?;

    state.audit.append(
        AuditEvent::new(
            "bridge",
            ctx.actor(),
            "bridge_unlink",
            AuditResource::new("platform", format!("{platform}/{channel}")),
        )
        .compliance("lifecycle", Severity::Medium),
    )?;

    Ok(json!({ "unlinked": true }))
}

pub async fn bridge_links(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    Ok(json!({ "links": bridge(state)?.list_links() }))
}

/// What this bridge build can do, for client feature-gating.
pub async fn capabilities(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    Ok(json!({
        "matrix": state.matrix.is_some(),
        "platforms": state.platforms.platforms(),
        "scrubber_mode": state.scrubber.mode(),
        "voice": !state.config.voice.turn_url.is_empty(),
        "features": state.license.features(),
        "methods": crate::dispatch::METHODS.iter().map(|(m, _)| *m).collect::<Vec<_>>(),
    }))
}
