use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the broker does when chain verification finds a break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChainBreakBehavior {
    /// Log the break and exit with code 2.
    #[default]
    Halt,
    /// Keep serving but mark the log degraded and refuse exports.
    Degrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Path of the append-only audit log (JSON lines).
    #[serde(default = "d_audit_path")]
    pub path: String,
    /// Entries older than this many days are dropped by the retention
    /// sweep; the chain is rebased from the new earliest entry.
    #[serde(default = "d_retention_days")]
    pub retention_days: u32,
    /// fsync after appending critical-severity entries.
    #[serde(default = "d_true")]
    pub fsync_critical: bool,
    #[serde(default)]
    pub on_chain_break: ChainBreakBehavior,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: d_audit_path(),
            retention_days: d_retention_days(),
            fsync_critical: true,
            on_chain_break: ChainBreakBehavior::default(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_audit_path() -> String {
    "/var/lib/wardbridge/audit.jsonl".into()
}
fn d_retention_days() -> u32 {
    90
}
fn d_true() -> bool {
    true
}
