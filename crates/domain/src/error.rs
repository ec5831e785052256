/// Shared error type used across all wardbridge crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    /// A policy decision rejected the operation. `required_actions` names
    /// what the caller must do before retrying (e.g. `device_verification`).
    #[error("denied: {reason}")]
    Denied {
        reason: String,
        required_actions: Vec<String>,
    },

    /// Keystore decryption mismatch, audit-chain break, or a secret
    /// delivery that could not complete. Always logged as critical.
    #[error("integrity: {0}")]
    Integrity(String),

    #[error("token: {0}")]
    Token(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// External I/O failed (container runtime, homeserver, platform API).
    #[error("downstream {system}: {message}")]
    Downstream { system: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn denied(reason: impl Into<String>, required_actions: Vec<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
            required_actions,
        }
    }

    pub fn downstream(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Downstream {
            system: system.into(),
            message: message.into(),
        }
    }

    /// Three-letter error category prefix used in structured error codes
    /// and in the broker's recent-error store.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Json(_) | Self::Config(_) => "REQ",
            Self::Denied { .. } => "AUT",
            Self::NotFound { .. } | Self::Conflict(_) | Self::Token(_) => "RES",
            Self::Integrity(_) => "INT",
            Self::Io(_) | Self::Timeout(_) | Self::Downstream { .. } => "DWN",
            Self::Other(_) => "DWN",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
