use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::TrustLevel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Zero-trust verifier + policy middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-operation enforcement policy override. Fields left unset fall
/// back to the built-in default binding for that operation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyOverride {
    pub min_trust: Option<TrustLevel>,
    pub max_risk: Option<u8>,
    pub require_verified_device: Option<bool>,
    pub require_mfa: Option<bool>,
    /// Anomaly flags tolerated for this operation.
    pub allowed_anomalies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZeroTrustConfig {
    /// Consecutive denials before a session is locked out.
    #[serde(default = "d_max_attempts")]
    pub max_verification_attempts: u32,
    /// Lockout duration in minutes.
    #[serde(default = "d_lockout_minutes")]
    pub lockout_minutes: u64,
    /// Session lifetime in minutes.
    #[serde(default = "d_session_ttl_minutes")]
    pub session_ttl_minutes: u64,
    /// Unverified devices are dropped after this many days.
    #[serde(default = "d_unverified_device_ttl_days")]
    pub unverified_device_ttl_days: u32,
    /// Verification request lifetime in minutes.
    #[serde(default = "d_verification_ttl_minutes")]
    pub verification_ttl_minutes: u64,
    /// How long after first contact a device still scores as "new".
    #[serde(default = "d_new_device_window_minutes")]
    pub new_device_window_minutes: u64,
    /// Per-operation policy overrides, keyed by operation name
    /// (e.g. `container_exec`).
    #[serde(default)]
    pub policies: HashMap<String, PolicyOverride>,
}

impl Default for ZeroTrustConfig {
    fn default() -> Self {
        Self {
            max_verification_attempts: d_max_attempts(),
            lockout_minutes: d_lockout_minutes(),
            session_ttl_minutes: d_session_ttl_minutes(),
            unverified_device_ttl_days: d_unverified_device_ttl_days(),
            verification_ttl_minutes: d_verification_ttl_minutes(),
            new_device_window_minutes: d_new_device_window_minutes(),
            policies: HashMap::new(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_attempts() -> u32 {
    5
}
fn d_lockout_minutes() -> u64 {
    30
}
fn d_session_ttl_minutes() -> u64 {
    12 * 60
}
fn d_unverified_device_ttl_days() -> u32 {
    7
}
fn d_verification_ttl_minutes() -> u64 {
    60
}
fn d_new_device_window_minutes() -> u64 {
    5
}
