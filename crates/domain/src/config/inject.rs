use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Secret injector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectConfig {
    /// Directory holding per-container secret sockets (mode 0660 each).
    #[serde(default = "d_socket_dir")]
    pub socket_dir: String,
    /// Seconds to wait for the agent to connect before tearing the
    /// socket down and failing the delivery.
    #[serde(default = "d_accept_timeout_secs")]
    pub accept_timeout_secs: u64,
    /// One-time token lifetime in seconds.
    #[serde(default = "d_token_ttl_secs")]
    pub token_ttl_secs: u64,
    /// Permit the diagnostic environment-variable delivery mode. Weaker
    /// than socket delivery; every use is logged and audited as such.
    #[serde(default)]
    pub allow_env_fallback: bool,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            socket_dir: d_socket_dir(),
            accept_timeout_secs: d_accept_timeout_secs(),
            token_ttl_secs: d_token_ttl_secs(),
            allow_env_fallback: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_socket_dir() -> String {
    "/run/wardbridge/secrets".into()
}
fn d_accept_timeout_secs() -> u64 {
    5
}
fn d_token_ttl_secs() -> u64 {
    300
}
