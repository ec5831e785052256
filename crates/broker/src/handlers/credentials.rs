//! Credential management and one-time token submission.
//!
//! Plaintext values travel only in request/response bodies over the
//! restricted socket; they are never logged or audited.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::{Provider, Severity};
use wb_inject::FormField;
use wb_keystore::CredentialFilter;

use crate::dispatch::ConnCtx;
use crate::handlers::{opt_str, req_str};
use crate::rpc::RpcError;
use crate::state::BrokerState;

fn parse_provider(params: &Value) -> Result<Provider, RpcError> {
    req_str(params, "provider")?
        .parse::<Provider>()
        .map_err(RpcError::from)
}

fn credential_json(cred: &wb_keystore::Credential) -> Value {
    json!({
        "id": cred.id,
        "provider": cred.provider,
        "display_name": cred.display_name,
        "tags": cred.tags,
        "expires_at": cred.expires_at,
        "created_at": cred.created_at,
        "last_used_at": cred.last_used_at,
    })
}

pub async fn store(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    let provider = parse_provider(&params)?;
    let display_name = opt_str(&params, "display_name").unwrap_or_else(|| id.clone());
    let value = req_str(&params, "value")?;
    let tags: Vec<String> = params["tags"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let expires_at: Option<DateTime<Utc>> = params
        .get("expires_at")
        .filter(|v| !v.is_null())
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| RpcError::invalid_params(format!("expires_at: {e}")))?;

    let cred =
        state
            .keystore
            .store_credential(&id, provider, &display_name, tags, expires_at, &value)?;

    state.audit.append(
        AuditEvent::new(
            "credential",
            ctx.actor(),
            "credential_store",
            AuditResource::new("credential", &id),
        )
        .detail(json!({ "provider": provider }))
        .compliance("security", Severity::High),
    )?;

    Ok(credential_json(&cred))
}

pub async fn list(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let filter = CredentialFilter {
        provider: opt_str(&params, "provider")
            .map(|p| p.parse::<Provider>())
            .transpose()?,
        tag: opt_str(&params, "tag"),
        include_expired: params["include_expired"].as_bool().unwrap_or(false),
    };
    let credentials: Vec<Value> = state
        .keystore
        .list_credentials(&filter)
        .iter()
        .map(credential_json)
        .collect();
    Ok(json!({ "credentials": credentials }))
}

/// Retrieve a credential with its decrypted value. The value appears in
/// the response only; the audit entry records the access, not the
/// secret.
pub async fn get(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    let cred = state.keystore.get_credential(&id)?;

    state.audit.append(
        AuditEvent::new(
            "credential",
            ctx.actor(),
            "credential_retrieve",
            AuditResource::new("credential", &id),
        )
        .compliance("security", Severity::High),
    )?;

    let mut out = credential_json(&cred);
    out["value"] = json!(cred
        .plaintext
        .as_ref()
        .map(|p| p.expose().to_string()));
    Ok(out)
}

pub async fn delete(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    state.keystore.delete_credential(&id)?;

    state.audit.append(
        AuditEvent::new(
            "credential",
            ctx.actor(),
            "credential_delete",
            AuditResource::new("credential", &id),
        )
        .compliance("security", Severity::High),
    )?;

    Ok(json!({ "deleted": id }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One-time tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mint a one-time token for a secret submission form.
pub async fn token_generate(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let secret_type = opt_str(&params, "secret_type").unwrap_or_else(|| "api_key".into());
    let provider = parse_provider(&params)?;
    let session_id = ctx.session().unwrap_or_default();

    let form_schema = vec![FormField {
        name: "value".into(),
        label: "Secret value".into(),
        field_type: "secret".into(),
        required: true,
    }];
    let token = state
        .tokens
        .generate(secret_type, provider, session_id, form_schema);

    state.audit.append(
        AuditEvent::new(
            "token",
            ctx.actor(),
            "token_generate",
            AuditResource::new("token", &token.id),
        )
        .detail(json!({ "provider": provider }))
        .compliance("security", Severity::Medium),
    )?;

    Ok(serde_json::to_value(token)?)
}

/// Submit a secret against a one-time token. The token is consumed
/// atomically before the credential is stored; replay fails.
pub async fn token_submit(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let token_id = req_str(&params, "token")?;
    let value = req_str(&params, "value")?;

    let token = state.tokens.consume(&token_id)?;

    let credential_id = opt_str(&params, "credential_id")
        .unwrap_or_else(|| format!("{}-{}", token.provider, &token.id[..8]));
    let display_name =
        opt_str(&params, "display_name").unwrap_or_else(|| credential_id.clone());

    let cred = state.keystore.store_credential(
        &credential_id,
        token.provider,
        &display_name,
        vec![token.secret_type.clone()],
        None,
        &value,
    )?;

    state.audit.append(
        AuditEvent::new(
            "token",
            ctx.actor(),
            "token_submit",
            AuditResource::new("credential", &credential_id),
        )
        .detail(json!({ "token": token.id, "provider": token.provider }))
        .compliance("security", Severity::High),
    )?;

    Ok(credential_json(&cred))
}
