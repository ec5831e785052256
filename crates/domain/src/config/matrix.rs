use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Matrix adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Homeserver base URL (e.g. `https://matrix.example.org`).
    #[serde(default)]
    pub homeserver: String,
    /// Full Matrix user id (e.g. `@bridge:example.org`).
    #[serde(default)]
    pub user_id: String,
    /// Access token. Usually supplied via `WB_MATRIX_ACCESS_TOKEN`.
    #[serde(default)]
    pub access_token: String,
    /// Refresh token, when the homeserver issued one.
    #[serde(default)]
    pub refresh_token: String,
    /// Long-poll timeout for `/sync` in milliseconds.
    #[serde(default = "d_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Scrub outgoing message bodies before sending.
    #[serde(default = "d_true")]
    pub scrub_outgoing: bool,
    /// Server name used when materializing ghost users
    /// (`@<platform>_<id>:<server_name>`).
    #[serde(default)]
    pub server_name: String,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            homeserver: String::new(),
            user_id: String::new(),
            access_token: String::new(),
            refresh_token: String::new(),
            sync_timeout_ms: d_sync_timeout_ms(),
            scrub_outgoing: true,
            server_name: String::new(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_sync_timeout_ms() -> u64 {
    30_000
}
fn d_true() -> bool {
    true
}
