//! RPC method handlers, one module per method group.

pub mod attachments;
pub mod audit;
pub mod containers;
pub mod credentials;
pub mod devices;
pub mod errors;
pub mod license;
pub mod matrix;
pub mod platforms;
pub mod plugins;
pub mod recovery;
pub mod session;
pub mod voice;

use serde_json::Value;

use crate::dispatch::ConnCtx;
use crate::rpc::RpcError;

/// Required string parameter.
pub(crate) fn req_str(params: &Value, key: &str) -> Result<String, RpcError> {
    params[key]
        .as_str()
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RpcError::invalid_params(format!("missing required param '{key}'")))
}

/// Optional string parameter.
pub(crate) fn opt_str(params: &Value, key: &str) -> Option<String> {
    params[key]
        .as_str()
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// The session bound to this connection; an error when none is.
pub(crate) fn bound_session(ctx: &ConnCtx) -> Result<String, RpcError> {
    ctx.session().ok_or_else(|| {
        RpcError::invalid_params("no session bound; call session_identify first")
    })
}
