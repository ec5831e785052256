//! Recent-error query and resolution.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::dispatch::ConnCtx;
use crate::handlers::{opt_str, req_str};
use crate::rpc::RpcError;
use crate::state::BrokerState;

pub async fn query(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let limit = params["limit"].as_u64().unwrap_or(50) as usize;
    let category = opt_str(&params, "category");
    let errors = state.errors.query(limit, category.as_deref());
    Ok(json!({
        "errors": errors,
        "unresolved": state.errors.unresolved_count(),
    }))
}

pub async fn resolve(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let id = req_str(&params, "id")?;
    let resolved = state.errors.resolve(&id)?;
    Ok(serde_json::to_value(resolved)?)
}
