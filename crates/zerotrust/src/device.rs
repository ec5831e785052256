//! Device registry.
//!
//! Devices are keyed by their stable fingerprint hash. A device belongs
//! to exactly one user; trust decays without reinforcement and
//! unverified devices age out entirely.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wb_domain::types::TrustLevel;
use wb_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Device
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    #[default]
    Unverified,
    Pending,
    AwaitingSecondFactor,
    Verified,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub device_id: String,
    pub user_id: String,
    /// Stable fingerprint hash (see [`crate::FingerprintInput`]).
    pub fingerprint: String,
    pub trust: TrustLevel,
    pub verification: VerificationState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// IPs this device has been seen from, with last-seen timestamps.
    pub known_ips: HashMap<String, DateTime<Utc>>,
    pub verification_count: u32,
    pub failed_verifications: u32,
    pub verified_by: Option<String>,
    pub verification_reason: Option<String>,
}

impl Device {
    pub fn is_verified(&self) -> bool {
        self.verification == VerificationState::Verified
    }

    pub fn knows_ip(&self, ip: &str) -> bool {
        self.known_ips.contains_key(ip)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DeviceRegistry {
    /// fingerprint → device. The fingerprint is the identity; device_id
    /// is the stable handle other tables store.
    by_fingerprint: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            by_fingerprint: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a fingerprint to its device, registering it on first
    /// contact. Returns `(device, is_new)`; a resubmission updates
    /// last-seen and the known-IP set.
    pub fn register_or_touch(
        &self,
        user_id: &str,
        fingerprint: &str,
        ip: &str,
    ) -> Result<(Device, bool)> {
        let now = Utc::now();
        let mut devices = self.by_fingerprint.write();

        if let Some(device) = devices.get_mut(fingerprint) {
            if device.user_id != user_id {
                // A device belongs to exactly one user.
                return Err(Error::Conflict(format!(
                    "fingerprint is already bound to another user ({})",
                    device.user_id
                )));
            }
            device.last_seen = now;
            device.known_ips.insert(ip.to_string(), now);
            return Ok((device.clone(), false));
        }

        let device = Device {
            device_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            fingerprint: fingerprint.to_string(),
            trust: TrustLevel::Untrusted,
            verification: VerificationState::Unverified,
            first_seen: now,
            last_seen: now,
            known_ips: HashMap::from([(ip.to_string(), now)]),
            verification_count: 0,
            failed_verifications: 0,
            verified_by: None,
            verification_reason: None,
        };
        devices.insert(fingerprint.to_string(), device.clone());
        tracing::info!(device = %device.device_id, user = %user_id, "new device registered");
        Ok((device, true))
    }

    pub fn get(&self, device_id: &str) -> Result<Device> {
        self.by_fingerprint
            .read()
            .values()
            .find(|d| d.device_id == device_id)
            .cloned()
            .ok_or_else(|| Error::not_found("device", device_id))
    }

    pub fn list(&self, user_id: Option<&str>) -> Vec<Device> {
        self.by_fingerprint
            .read()
            .values()
            .filter(|d| user_id.map_or(true, |u| d.user_id == u))
            .cloned()
            .collect()
    }

    /// Mark a device verified and reinforce its trust.
    pub fn mark_verified(
        &self,
        device_id: &str,
        verifier: &str,
        reason: Option<String>,
    ) -> Result<Device> {
        self.update(device_id, |device| {
            device.verification = VerificationState::Verified;
            device.trust = TrustLevel::Verified;
            device.verification_count += 1;
            device.verified_by = Some(verifier.to_string());
            device.verification_reason = reason.clone();
        })
    }

    pub fn mark_rejected(&self, device_id: &str, verifier: &str) -> Result<Device> {
        self.update(device_id, |device| {
            device.verification = VerificationState::Rejected;
            device.trust = TrustLevel::Untrusted;
            device.failed_verifications += 1;
            device.verified_by = Some(verifier.to_string());
        })
    }

    pub fn set_verification_state(
        &self,
        device_id: &str,
        state: VerificationState,
    ) -> Result<Device> {
        self.update(device_id, |device| device.verification = state)
    }

    pub fn record_failed_verification(&self, device_id: &str) -> Result<Device> {
        self.update(device_id, |device| device.failed_verifications += 1)
    }

    /// Admin revocation: the device is gone, not just untrusted.
    pub fn revoke(&self, device_id: &str) -> Result<()> {
        let mut devices = self.by_fingerprint.write();
        let fingerprint = devices
            .values()
            .find(|d| d.device_id == device_id)
            .map(|d| d.fingerprint.clone())
            .ok_or_else(|| Error::not_found("device", device_id))?;
        devices.remove(&fingerprint);
        tracing::info!(device = %device_id, "device revoked");
        Ok(())
    }

    /// Trust decays one rung per sweep for devices without recent
    /// contact; verified devices keep their verified state but still
    /// lose ladder position when dormant.
    pub fn decay_stale(&self, stale_after: Duration) -> usize {
        let now = Utc::now();
        let mut decayed = 0;
        for device in self.by_fingerprint.write().values_mut() {
            if now.signed_duration_since(device.last_seen) <= stale_after {
                continue;
            }
            let lowered = match device.trust {
                TrustLevel::Verified => TrustLevel::High,
                TrustLevel::High => TrustLevel::Medium,
                TrustLevel::Medium => TrustLevel::Low,
                TrustLevel::Low | TrustLevel::Untrusted => TrustLevel::Untrusted,
            };
            if lowered != device.trust {
                device.trust = lowered;
                // Mark the decay so the next sweep interval starts now.
                device.last_seen = now;
                decayed += 1;
            }
        }
        decayed
    }

    /// Drop unverified devices older than the TTL. Returns how many.
    pub fn sweep_unverified(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let mut devices = self.by_fingerprint.write();
        let before = devices.len();
        devices.retain(|_, d| {
            d.is_verified() || now.signed_duration_since(d.first_seen) <= ttl
        });
        before - devices.len()
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, device_id: &str, f: impl Fn(&mut Device)) -> Result<Device> {
        let mut devices = self.by_fingerprint.write();
        let device = devices
            .values_mut()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| Error::not_found("device", device_id))?;
        f(device);
        Ok(device.clone())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resubmission_resolves_to_same_device_and_learns_ips() {
        let registry = DeviceRegistry::new();
        let (first, is_new) = registry
            .register_or_touch("alice", "fp-1", "10.0.0.1")
            .unwrap();
        assert!(is_new);

        let (second, is_new) = registry
            .register_or_touch("alice", "fp-1", "10.0.0.2")
            .unwrap();
        assert!(!is_new);
        assert_eq!(first.device_id, second.device_id);
        assert!(second.knows_ip("10.0.0.1"));
        assert!(second.knows_ip("10.0.0.2"));
    }

    #[test]
    fn fingerprint_binds_to_one_user() {
        let registry = DeviceRegistry::new();
        registry
            .register_or_touch("alice", "fp-1", "10.0.0.1")
            .unwrap();
        assert!(registry
            .register_or_touch("mallory", "fp-1", "10.0.0.9")
            .is_err());
    }

    #[test]
    fn verification_reinforces_trust() {
        let registry = DeviceRegistry::new();
        let (device, _) = registry
            .register_or_touch("alice", "fp-1", "10.0.0.1")
            .unwrap();
        let device = registry
            .mark_verified(&device.device_id, "admin", Some("hardware token".into()))
            .unwrap();
        assert!(device.is_verified());
        assert_eq!(device.trust, TrustLevel::Verified);
        assert_eq!(device.verification_count, 1);
    }

    #[test]
    fn stale_trust_decays_one_rung_per_sweep() {
        let registry = DeviceRegistry::new();
        let (device, _) = registry
            .register_or_touch("alice", "fp-1", "10.0.0.1")
            .unwrap();
        registry
            .mark_verified(&device.device_id, "admin", None)
            .unwrap();

        // Zero-width window: everything is stale.
        assert_eq!(registry.decay_stale(Duration::zero()), 1);
        assert_eq!(
            registry.get(&device.device_id).unwrap().trust,
            TrustLevel::High
        );
    }

    #[test]
    fn unverified_devices_age_out() {
        let registry = DeviceRegistry::new();
        registry
            .register_or_touch("alice", "fp-1", "10.0.0.1")
            .unwrap();
        let (device, _) = registry
            .register_or_touch("bob", "fp-2", "10.0.0.2")
            .unwrap();
        registry
            .mark_verified(&device.device_id, "admin", None)
            .unwrap();

        assert_eq!(registry.sweep_unverified(Duration::zero()), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn revoked_device_is_gone() {
        let registry = DeviceRegistry::new();
        let (device, _) = registry
            .register_or_touch("alice", "fp-1", "10.0.0.1")
            .unwrap();
        registry.revoke(&device.device_id).unwrap();
        assert!(registry.get(&device.device_id).is_err());
    }
}
