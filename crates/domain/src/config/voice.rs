use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Voice sessions (TURN relay)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// TURN server URL (e.g. `turn:turn.example.org:3478`). Empty =
    /// voice sessions disabled.
    #[serde(default)]
    pub turn_url: String,
    /// Optional STUN URL returned alongside the TURN entry.
    #[serde(default = "d_stun_url")]
    pub stun_url: String,
    /// Shared secret used to mint ephemeral TURN credentials.
    /// Usually supplied via `WB_TURN_SECRET`.
    #[serde(default)]
    pub turn_secret: String,
    /// Lifetime of minted TURN credentials in seconds.
    #[serde(default = "d_credential_ttl_secs")]
    pub credential_ttl_secs: u64,
    /// Maximum concurrent voice sessions.
    #[serde(default = "d_max_sessions")]
    pub max_sessions: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            turn_url: String::new(),
            stun_url: d_stun_url(),
            turn_secret: String::new(),
            credential_ttl_secs: d_credential_ttl_secs(),
            max_sessions: d_max_sessions(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_stun_url() -> String {
    "stun:stun.l.google.com:19302".into()
}
fn d_credential_ttl_secs() -> u64 {
    86_400
}
fn d_max_sessions() -> usize {
    8
}
