//! Config attachment upload.
//!
//! Writes a named attachment under the configs directory. Names are
//! sanitized against traversal and the payload is capped at 1 MiB.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use wb_audit::{AuditEvent, AuditResource};
use wb_domain::types::Severity;

use crate::dispatch::ConnCtx;
use crate::handlers::req_str;
use crate::rpc::RpcError;
use crate::state::BrokerState;

const MAX_ATTACHMENT_BYTES: usize = 1024 * 1024;

/// Keep only a conservative filename alphabet; reject anything that
/// could climb out of the configs directory.
fn sanitize_name(raw: &str) -> Result<String, RpcError> {
    if raw.is_empty() || raw.len() > 128 {
        return Err(RpcError::invalid_params("attachment name length out of range"));
    }
    if raw.contains("..") || raw.contains('/') || raw.contains('\\') {
        return Err(RpcError::invalid_params(
            "attachment name must not contain path separators",
        ));
    }
    let sanitized: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    if sanitized.is_empty() || sanitized.starts_with('.') {
        return Err(RpcError::invalid_params("attachment name is not usable"));
    }
    Ok(sanitized)
}

pub async fn attach(
    state: &Arc<BrokerState>,
    ctx: &ConnCtx,
    params: Value,
) -> Result<Value, RpcError> {
    let name = sanitize_name(&req_str(&params, "name")?)?;
    let content = req_str(&params, "content")?;
    if content.len() > MAX_ATTACHMENT_BYTES {
        return Err(RpcError::invalid_params(format!(
            "attachment exceeds {MAX_ATTACHMENT_BYTES} bytes"
        )));
    }

    let dir = Path::new(&state.config.server.configs_dir);
    std::fs::create_dir_all(dir).map_err(wb_domain::Error::Io)?;
    let path = dir.join(&name);
    std::fs::write(&path, content.as_bytes()).map_err(wb_domain::Error::Io)?;

    state.audit.append(
        AuditEvent::new(
            "config",
            ctx.actor(),
            "config_attach",
            AuditResource::new("attachment", &name),
        )
        .detail(json!({ "bytes": content.len() }))
        .compliance("lifecycle", Severity::Medium),
    )?;

    Ok(json!({ "name": name, "bytes": content.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_names_are_rejected() {
        assert!(sanitize_name("../../etc/passwd").is_err());
        assert!(sanitize_name("a/b.toml").is_err());
        assert!(sanitize_name("a\\b.toml").is_err());
        assert!(sanitize_name(".hidden").is_err());
        assert!(sanitize_name("").is_err());
    }

    #[test]
    fn normal_names_survive() {
        assert_eq!(sanitize_name("agents.toml").unwrap(), "agents.toml");
        assert_eq!(sanitize_name("my config!.yml").unwrap(), "myconfig.yml");
    }
}
