//! Enforcement policies and the zero-trust manager.
//!
//! The manager owns the device and session tables (they reference each
//! other by id only) and evaluates every operation against its policy:
//! lockout, trust floor, risk ceiling, MFA, verified-device requirement,
//! and the anomaly allow-list, in that order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use wb_domain::config::ZeroTrustConfig;
use wb_domain::types::TrustLevel;
use wb_domain::{Error, Result};

use crate::device::{Device, DeviceRegistry};
use crate::fingerprint::FingerprintInput;
use crate::risk::{detect_anomalies, risk_score, trust_for, AnomalyVerifier, RiskContext};
use crate::session::{Session, SessionTable};
use crate::verify::{
    VerificationDecision, VerificationMethod, VerificationRequest, VerificationStore,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct EnforcementPolicy {
    pub operation: String,
    pub min_trust: TrustLevel,
    pub max_risk: u8,
    pub require_verified_device: bool,
    pub require_mfa: bool,
    /// Anomaly flags tolerated for this operation; any other observed
    /// flag denies the request.
    pub allowed_anomalies: Vec<String>,
    /// Sensitive operations trip the new-device anomaly check.
    pub sensitive: bool,
}

impl EnforcementPolicy {
    fn new(operation: &str, min_trust: TrustLevel, max_risk: u8) -> Self {
        Self {
            operation: operation.to_string(),
            min_trust,
            max_risk,
            require_verified_device: false,
            require_mfa: false,
            allowed_anomalies: Vec::new(),
            sensitive: false,
        }
    }

    fn verified(mut self) -> Self {
        self.require_verified_device = true;
        self
    }

    fn mfa(mut self) -> Self {
        self.require_mfa = true;
        self
    }

    fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    fn tolerate(mut self, flags: &[&str]) -> Self {
        self.allowed_anomalies = flags.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// The built-in policy bindings.
pub fn default_policies() -> HashMap<String, EnforcementPolicy> {
    let policies = [
        EnforcementPolicy::new("container_create", TrustLevel::Medium, 40),
        EnforcementPolicy::new("container_exec", TrustLevel::High, 30)
            .verified()
            .sensitive(),
        EnforcementPolicy::new("secret_access", TrustLevel::High, 25)
            .verified()
            .mfa()
            .sensitive(),
        EnforcementPolicy::new("key_management", TrustLevel::Verified, 20)
            .verified()
            .mfa()
            .sensitive(),
        EnforcementPolicy::new("config_change", TrustLevel::High, 30)
            .verified()
            .sensitive(),
        EnforcementPolicy::new("admin_access", TrustLevel::Verified, 15)
            .verified()
            .mfa()
            .sensitive(),
        EnforcementPolicy::new("message_send", TrustLevel::Low, 60).tolerate(&["ip_change"]),
        EnforcementPolicy::new("message_receive", TrustLevel::Low, 70)
            .tolerate(&["ip_change"]),
        EnforcementPolicy::new("voice_session", TrustLevel::Medium, 40)
            .tolerate(&["ip_change"]),
        EnforcementPolicy::new("platform_manage", TrustLevel::High, 30).verified(),
        EnforcementPolicy::new("plugin_manage", TrustLevel::High, 30)
            .verified()
            .sensitive(),
        EnforcementPolicy::new("recovery", TrustLevel::Medium, 40),
        EnforcementPolicy::new("license_manage", TrustLevel::High, 30).verified(),
        EnforcementPolicy::new("status_read", TrustLevel::Untrusted, 90)
            .tolerate(&["ip_change"]),
        EnforcementPolicy::new("audit_read", TrustLevel::High, 30).verified(),
    ];
    policies
        .into_iter()
        .map(|p| (p.operation.clone(), p))
        .collect()
}

/// The middleware's verdict on one request.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub operation: String,
    pub reason: Option<String>,
    pub required_actions: Vec<String>,
    pub risk: u8,
    pub trust: TrustLevel,
    pub anomalies: Vec<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ZeroTrustManager {
    devices: Arc<DeviceRegistry>,
    sessions: Arc<SessionTable>,
    verifications: VerificationStore,
    policies: HashMap<String, EnforcementPolicy>,
    verifiers: RwLock<Vec<Box<dyn AnomalyVerifier>>>,
    max_attempts: u32,
    lockout: Duration,
    unverified_device_ttl: Duration,
    new_device_window: Duration,
}

impl ZeroTrustManager {
    pub fn from_config(config: &ZeroTrustConfig) -> Self {
        let mut policies = default_policies();
        for (operation, ovr) in &config.policies {
            let policy = policies
                .entry(operation.clone())
                .or_insert_with(|| EnforcementPolicy::new(operation, TrustLevel::Medium, 40));
            if let Some(min_trust) = ovr.min_trust {
                policy.min_trust = min_trust;
            }
            if let Some(max_risk) = ovr.max_risk {
                policy.max_risk = max_risk;
            }
            if let Some(v) = ovr.require_verified_device {
                policy.require_verified_device = v;
            }
            if let Some(v) = ovr.require_mfa {
                policy.require_mfa = v;
            }
            if let Some(flags) = &ovr.allowed_anomalies {
                policy.allowed_anomalies = flags.clone();
            }
        }

        Self {
            devices: Arc::new(DeviceRegistry::new()),
            sessions: Arc::new(SessionTable::new(std::time::Duration::from_secs(
                config.session_ttl_minutes * 60,
            ))),
            verifications: VerificationStore::new(std::time::Duration::from_secs(
                config.verification_ttl_minutes * 60,
            )),
            policies,
            verifiers: RwLock::new(Vec::new()),
            max_attempts: config.max_verification_attempts,
            lockout: Duration::minutes(config.lockout_minutes as i64),
            unverified_device_ttl: Duration::days(config.unverified_device_ttl_days as i64),
            new_device_window: Duration::minutes(config.new_device_window_minutes as i64),
        }
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    pub fn policy(&self, operation: &str) -> Option<&EnforcementPolicy> {
        self.policies.get(operation)
    }

    /// Register a custom anomaly verifier.
    pub fn add_verifier(&self, verifier: Box<dyn AnomalyVerifier>) {
        self.verifiers.write().push(verifier);
    }

    // ── identification ─────────────────────────────────────────────

    /// Bind a caller to a session: resolve (or register) the device for
    /// the submitted fingerprint and mint a session against it.
    pub fn identify(
        &self,
        user_id: &str,
        fingerprint: &FingerprintInput,
        ip: &str,
    ) -> Result<(Session, Device, bool)> {
        let hash = fingerprint.stable_hash();
        let (device, is_new) = self.devices.register_or_touch(user_id, &hash, ip)?;
        let session = self.sessions.create(user_id, &device.device_id, ip);
        Ok((session, device, is_new))
    }

    /// Record a fresh MFA confirmation on a session.
    pub fn record_mfa(&self, session_id: &str) -> Result<Session> {
        self.sessions.record_mfa(session_id)
    }

    // ── authorization ──────────────────────────────────────────────

    /// Evaluate `operation` for the session. A denial is a decision,
    /// not an error; errors mean the session or policy does not exist.
    pub fn authorize(
        &self,
        session_id: &str,
        operation: &str,
        current_ip: &str,
    ) -> Result<PolicyDecision> {
        let policy = self
            .policies
            .get(operation)
            .ok_or_else(|| Error::not_found("policy", operation))?
            .clone();
        let session = self.sessions.get(session_id)?;
        let now = Utc::now();

        // 1. Standing lockout wins before anything is computed.
        if session.is_locked(now) {
            return Ok(PolicyDecision {
                allowed: false,
                operation: policy.operation,
                reason: Some(match session.lockout_until {
                    Some(until) => format!("session is locked out until {until}"),
                    None => "session is locked out".into(),
                }),
                required_actions: vec![],
                risk: session.risk_score,
                trust: session.trust,
                anomalies: session.anomaly_flags.clone(),
                locked_until: session.lockout_until,
            });
        }

        let device = self.devices.get(&session.device_id)?;
        let device_is_new =
            now.signed_duration_since(device.first_seen) < self.new_device_window;

        // 2. Score the request on the state as it was, then fold the
        // observation into both records.
        let ctx = RiskContext {
            device: &device,
            device_is_new,
            session: &session,
            current_ip,
            operation_sensitive: policy.sensitive,
            now,
        };
        let risk = risk_score(&ctx);
        let anomalies = detect_anomalies(&ctx, &self.verifiers.read());
        let trust = trust_for(risk, &device);

        self.sessions.update(session_id, |s| {
            s.risk_score = risk;
            s.trust = trust;
            s.anomaly_flags = anomalies.clone();
            s.last_ip = current_ip.to_string();
            s.last_request_at = now;
        })?;
        self.devices
            .register_or_touch(&device.user_id, &device.fingerprint, current_ip)?;

        // 3–7. Policy checks, first failure wins.
        let denial = if trust < policy.min_trust {
            Some((
                format!(
                    "trust {trust} is below the required {} for {}",
                    policy.min_trust, policy.operation
                ),
                vec!["device_verification".to_string()],
            ))
        } else if risk > policy.max_risk {
            Some((
                format!(
                    "risk {risk} exceeds the {} ceiling for {}",
                    policy.max_risk, policy.operation
                ),
                vec![],
            ))
        } else if policy.require_mfa && !session.has_recent_mfa(now) {
            Some((
                "a recent multi-factor confirmation is required".to_string(),
                vec!["mfa_challenge".to_string()],
            ))
        } else if policy.require_verified_device && !device.is_verified() {
            Some((
                "a verified device is required for this operation".to_string(),
                vec!["device_verification".to_string()],
            ))
        } else if let Some(flag) = anomalies
            .iter()
            .find(|f| !policy.allowed_anomalies.contains(f))
        {
            Some((
                format!("anomaly detected: {flag}"),
                vec!["device_verification".to_string()],
            ))
        } else {
            None
        };

        match denial {
            Some((reason, required_actions)) => Ok(self.deny(
                session_id,
                &device,
                policy.operation,
                reason,
                required_actions,
                risk,
                trust,
                anomalies,
            )),
            None => {
                // 8. Allowed; consecutive-denial counter resets.
                self.sessions
                    .update(session_id, |s| s.verification_attempts = 0)?;
                Ok(PolicyDecision {
                    allowed: true,
                    operation: policy.operation,
                    reason: None,
                    required_actions: vec![],
                    risk,
                    trust,
                    anomalies,
                    locked_until: None,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn deny(
        &self,
        session_id: &str,
        device: &Device,
        operation: String,
        reason: String,
        required_actions: Vec<String>,
        risk: u8,
        trust: TrustLevel,
        anomalies: Vec<String>,
    ) -> PolicyDecision {
        let max_attempts = self.max_attempts;
        let lockout = self.lockout;
        let mut locked_until = None;

        let _ = self.sessions.update(session_id, |s| {
            s.verification_attempts += 1;
            if s.verification_attempts >= max_attempts {
                s.locked_out = true;
                s.lockout_until = Some(Utc::now() + lockout);
                locked_until = s.lockout_until;
            }
        });

        if locked_until.is_some() {
            let _ = self.devices.record_failed_verification(&device.device_id);
            tracing::warn!(
                session = %session_id,
                device = %device.device_id,
                "session locked out after repeated denials"
            );
        }

        tracing::debug!(session = %session_id, operation = %operation, %reason, "request denied");
        PolicyDecision {
            allowed: false,
            operation,
            reason: Some(reason),
            required_actions,
            risk,
            trust,
            anomalies,
            locked_until,
        }
    }

    // ── verification workflow ──────────────────────────────────────

    /// Open (or return the open) verification request for a device.
    pub fn request_verification(
        &self,
        device_id: &str,
        method: VerificationMethod,
    ) -> Result<VerificationRequest> {
        let device = self.devices.get(device_id)?;
        Ok(self.verifications.create(device_id, &device.user_id, method))
    }

    pub fn approve_verification(
        &self,
        request_id: &str,
        approver: &str,
        reason: Option<String>,
    ) -> Result<Device> {
        let request =
            self.verifications
                .resolve(request_id, VerificationDecision::Approved, approver)?;
        self.devices
            .mark_verified(&request.device_id, approver, reason)
    }

    pub fn reject_verification(&self, request_id: &str, decider: &str) -> Result<Device> {
        let request =
            self.verifications
                .resolve(request_id, VerificationDecision::Rejected, decider)?;
        self.devices.mark_rejected(&request.device_id, decider)
    }

    pub fn list_pending_verifications(&self) -> Vec<VerificationRequest> {
        self.verifications.list_pending()
    }

    // ── background maintenance ─────────────────────────────────────

    /// One sweep pass: expired sessions and verification requests,
    /// unverified-device TTL, trust decay. Returns (sessions, requests,
    /// devices) removed/decayed counts.
    pub fn sweep(&self) -> (usize, usize, usize) {
        let sessions = self.sessions.sweep();
        let requests = self.verifications.sweep();
        let devices = self.devices.sweep_unverified(self.unverified_device_ttl);
        self.devices.decay_stale(Duration::days(7));
        (sessions, requests, devices)
    }
}
