use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control socket server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path of the JSON-RPC control socket.
    #[serde(default = "d_socket_path")]
    pub socket_path: String,
    /// File mode applied to the control socket after bind (octal).
    #[serde(default = "d_socket_mode")]
    pub socket_mode: u32,
    /// Maximum accepted request line length in bytes.
    #[serde(default = "d_max_request_bytes")]
    pub max_request_bytes: usize,
    /// Directory where uploaded config attachments are written.
    #[serde(default = "d_configs_dir")]
    pub configs_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: d_socket_path(),
            socket_mode: d_socket_mode(),
            max_request_bytes: d_max_request_bytes(),
            configs_dir: d_configs_dir(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_socket_path() -> String {
    "/run/wardbridge/control.sock".into()
}
fn d_socket_mode() -> u32 {
    0o660
}
fn d_max_request_bytes() -> usize {
    1024 * 1024
}
fn d_configs_dir() -> String {
    "/var/lib/wardbridge/configs".into()
}
