use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Container manager + TTL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainersConfig {
    /// Container runtime binary invoked for lifecycle operations.
    #[serde(default = "d_runtime_bin")]
    pub runtime_bin: String,
    /// Agent image reference used for `start` when none is given.
    #[serde(default = "d_agent_image")]
    pub agent_image: String,
    /// Image digests allowed for container creation. Creation is refused
    /// when the requested image digest is not in this list. Empty list =
    /// refuse everything.
    #[serde(default)]
    pub allowed_digests: Vec<String>,
    /// Seconds a container may go without a heartbeat before eviction.
    #[serde(default = "d_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds between TTL reaper passes.
    #[serde(default = "d_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Seconds to wait for a graceful stop before removal proceeds.
    #[serde(default = "d_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            runtime_bin: d_runtime_bin(),
            agent_image: d_agent_image(),
            allowed_digests: Vec::new(),
            idle_timeout_secs: d_idle_timeout_secs(),
            check_interval_secs: d_check_interval_secs(),
            stop_grace_secs: d_stop_grace_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_runtime_bin() -> String {
    "docker".into()
}
fn d_agent_image() -> String {
    "wardbridge/agent:latest".into()
}
fn d_idle_timeout_secs() -> u64 {
    1800
}
fn d_check_interval_secs() -> u64 {
    60
}
fn d_stop_grace_secs() -> u64 {
    10
}
