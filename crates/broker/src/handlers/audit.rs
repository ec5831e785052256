//! Audit chain verification and export over RPC.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use wb_audit::{ChainStatus, ExportFormat};
use wb_domain::config::ChainBreakBehavior;

use crate::dispatch::ConnCtx;
use crate::handlers::opt_str;
use crate::rpc::RpcError;
use crate::state::BrokerState;

pub async fn verify(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    _params: Value,
) -> Result<Value, RpcError> {
    let status = state.audit.verify()?;
    match status {
        ChainStatus::Intact { entries, tip_hash } => Ok(json!({
            "intact": true,
            "entries": entries,
            "tip_hash": tip_hash,
        })),
        ChainStatus::Broken { at_sequence, reason } => {
            tracing::error!(at_sequence, %reason, "audit chain break detected");
            if state.config.audit.on_chain_break == ChainBreakBehavior::Degrade {
                state.audit.mark_degraded();
            }
            Ok(json!({
                "intact": false,
                "broken_at": at_sequence,
                "reason": reason,
            }))
        }
    }
}

pub async fn export(
    state: &Arc<BrokerState>,
    _ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let format = match opt_str(&params, "format").as_deref() {
        None | Some("json") => ExportFormat::Json,
        Some("csv") => ExportFormat::Csv,
        Some(other) => {
            return Err(RpcError::invalid_params(format!(
                "unknown export format '{other}'"
            )));
        }
    };
    let from: Option<DateTime<Utc>> = parse_time(&params, "from")?;
    let to: Option<DateTime<Utc>> = parse_time(&params, "to")?;

    let body = state.audit.export(from, to, format)?;
    Ok(json!({
        "format": match format {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        },
        "body": body,
        "tip_hash": state.audit.tip_hash(),
    }))
}

fn parse_time(params: &Value, key: &str) -> Result<Option<DateTime<Utc>>, RpcError> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| RpcError::invalid_params(format!("{key}: {e}")))
}
