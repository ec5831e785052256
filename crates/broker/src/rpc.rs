//! JSON-RPC 2.0 wire types and error-code mapping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use wb_domain::Error;

// ── standard codes ──────────────────────────────────────────────────
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// ── custom codes ────────────────────────────────────────────────────
pub const CONTAINER_OP_FAILED: i64 = -1;
pub const CONTAINER_NOT_FOUND: i64 = -2;
pub const CREDENTIAL_NOT_FOUND: i64 = -3;
pub const POLICY_DENIED: i64 = -4;

// ── voice session codes ─────────────────────────────────────────────
pub const VOICE_SESSION_EXISTS: i64 = -32000;
pub const VOICE_SESSION_NOT_FOUND: i64 = -32001;
pub const VOICE_LIMIT_REACHED: i64 = -32002;
pub const VOICE_TURN_UNCONFIGURED: i64 = -32003;
pub const VOICE_BAD_PAYLOAD: i64 = -32004;
pub const VOICE_SESSION_EXPIRED: i64 = -32005;
pub const VOICE_NOT_OWNER: i64 = -32006;
pub const VOICE_INTERNAL: i64 = -32007;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// Stable structured code: three-letter category prefix plus a
    /// numeric tail (`"RES-404"`).
    fn stable_code(err: &Error) -> String {
        let tail = match err {
            Error::Json(_) | Error::Config(_) => 400,
            Error::Denied { .. } => 403,
            Error::NotFound { .. } => 404,
            Error::Conflict(_) | Error::Token(_) => 409,
            Error::Integrity(_) => 500,
            Error::Timeout(_) => 504,
            Error::Io(_) | Error::Downstream { .. } | Error::Other(_) => 502,
        };
        format!("{}-{}", err.category(), tail)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::new(INTERNAL_ERROR, format!("serialization: {err}"))
            .with_data(serde_json::json!({ "code": "INT-500" }))
    }
}

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        let stable = RpcError::stable_code(&err);
        let code = match &err {
            Error::Json(_) | Error::Config(_) => INVALID_PARAMS,
            Error::Denied { .. } => POLICY_DENIED,
            Error::NotFound { kind, .. } => match *kind {
                "credential" => CREDENTIAL_NOT_FOUND,
                "container" => CONTAINER_NOT_FOUND,
                _ => INVALID_PARAMS,
            },
            Error::Integrity(_) => INTERNAL_ERROR,
            _ => CONTAINER_OP_FAILED,
        };

        let mut data = serde_json::json!({ "code": stable });
        if let Error::Denied {
            required_actions, ..
        } = &err
        {
            data["required_actions"] = serde_json::json!(required_actions);
        }

        RpcError::new(code, err.to_string()).with_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_not_found_maps_to_minus_three() {
        let rpc: RpcError = Error::not_found("credential", "k1").into();
        assert_eq!(rpc.code, CREDENTIAL_NOT_FOUND);
        assert_eq!(rpc.data.unwrap()["code"], "RES-404");
    }

    #[test]
    fn container_not_found_maps_to_minus_two() {
        let rpc: RpcError = Error::not_found("container", "c1").into();
        assert_eq!(rpc.code, CONTAINER_NOT_FOUND);
    }

    #[test]
    fn denial_carries_required_actions() {
        let rpc: RpcError = Error::denied(
            "a verified device is required",
            vec!["device_verification".into()],
        )
        .into();
        assert_eq!(rpc.code, POLICY_DENIED);
        let data = rpc.data.unwrap();
        assert_eq!(data["code"], "AUT-403");
        assert_eq!(data["required_actions"][0], "device_verification");
    }
}
