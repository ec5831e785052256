use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keystore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreConfig {
    /// Path of the encrypted credential store file (created 0600).
    #[serde(default = "d_keystore_path")]
    pub path: String,
    /// Path of the persisted random master-key salt (created 0600).
    #[serde(default = "d_salt_path")]
    pub salt_path: String,
    /// Argon2id memory cost in KiB. Operator-tunable.
    #[serde(default = "d_kdf_memory_kib")]
    pub kdf_memory_kib: u32,
    /// Argon2id time cost (iterations). Operator-tunable.
    #[serde(default = "d_kdf_time_cost")]
    pub kdf_time_cost: u32,
    /// Argon2id parallelism. Operator-tunable.
    #[serde(default = "d_kdf_parallelism")]
    pub kdf_parallelism: u32,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: d_keystore_path(),
            salt_path: d_salt_path(),
            kdf_memory_kib: d_kdf_memory_kib(),
            kdf_time_cost: d_kdf_time_cost(),
            kdf_parallelism: d_kdf_parallelism(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_keystore_path() -> String {
    "/var/lib/wardbridge/keystore.json".into()
}
fn d_salt_path() -> String {
    "/var/lib/wardbridge/master.salt".into()
}
fn d_kdf_memory_kib() -> u32 {
    64 * 1024
}
fn d_kdf_time_cost() -> u32 {
    3
}
fn d_kdf_parallelism() -> u32 {
    1
}
