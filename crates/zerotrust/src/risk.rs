//! Risk scoring, the trust ladder mapping, and anomaly detection.
//!
//! All pure functions over the device and session state so the weights
//! can be tested without a registry.

use chrono::{DateTime, Duration, Utc};

use wb_domain::types::TrustLevel;

use crate::device::Device;
use crate::session::Session;

/// Sessions younger than this pick up the new-session risk bump.
const NEW_SESSION_MINUTES: i64 = 5;

/// Inputs to one request's evaluation.
pub struct RiskContext<'a> {
    pub device: &'a Device,
    pub device_is_new: bool,
    pub session: &'a Session,
    pub current_ip: &'a str,
    /// The operation being attempted is tagged sensitive by policy.
    pub operation_sensitive: bool,
    pub now: DateTime<Utc>,
}

/// Contributes extra anomaly flags beyond the built-in set.
pub trait AnomalyVerifier: Send + Sync {
    fn name(&self) -> &str;
    /// Return a flag name when the request looks anomalous.
    fn check(&self, ctx: &RiskContext<'_>) -> Option<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Risk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-request risk in [0, 100].
pub fn risk_score(ctx: &RiskContext<'_>) -> u8 {
    let mut score: i32 = 0;

    if ctx.device_is_new {
        score += 30;
    }
    if ctx.device.is_verified() {
        score -= 20;
    }
    if !ctx.device.knows_ip(ctx.current_ip) {
        score += 15;
    }
    if ctx.device.failed_verifications > 3 {
        score += 25;
    }
    if ctx.session.age(ctx.now) < Duration::minutes(NEW_SESSION_MINUTES) {
        score += 10;
    }
    score += 5 * ctx.session.verification_attempts as i32;
    if ctx.session.origin_ip != ctx.current_ip {
        score += 20;
    }

    score.clamp(0, 100) as u8
}

/// Map risk and verification state to the five-point trust ladder.
pub fn trust_for(risk: u8, device: &Device) -> TrustLevel {
    if device.is_verified() && risk < 20 {
        return TrustLevel::Verified;
    }
    match risk {
        0..=19 => TrustLevel::High,
        20..=39 => TrustLevel::Medium,
        40..=59 => TrustLevel::Low,
        _ => TrustLevel::Untrusted,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Anomalies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const ANOMALY_IP_CHANGE: &str = "ip_change";
pub const ANOMALY_IMPOSSIBLE_TRAVEL: &str = "impossible_travel";
pub const ANOMALY_NEW_DEVICE_SENSITIVE: &str = "new_device_sensitive_access";
pub const ANOMALY_FAILED_VERIFICATIONS: &str = "multiple_failed_verifications";

/// Built-in anomaly flags plus any contributed by custom verifiers.
pub fn detect_anomalies(
    ctx: &RiskContext<'_>,
    verifiers: &[Box<dyn AnomalyVerifier>],
) -> Vec<String> {
    let mut flags = Vec::new();

    if !ctx.session.last_ip.is_empty() && ctx.session.last_ip != ctx.current_ip {
        flags.push(ANOMALY_IP_CHANGE.to_string());

        // Two different IPs within a second of each other.
        if ctx.now.signed_duration_since(ctx.session.last_request_at)
            < Duration::seconds(1)
        {
            flags.push(ANOMALY_IMPOSSIBLE_TRAVEL.to_string());
        }
    }

    if ctx.operation_sensitive && ctx.device.verification_count < 3 {
        flags.push(ANOMALY_NEW_DEVICE_SENSITIVE.to_string());
    }

    if ctx.device.failed_verifications > 3 {
        flags.push(ANOMALY_FAILED_VERIFICATIONS.to_string());
    }

    for verifier in verifiers {
        if let Some(flag) = verifier.check(ctx) {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceRegistry, VerificationState};
    use crate::session::SessionTable;

    fn fixtures() -> (Device, Session) {
        let registry = DeviceRegistry::new();
        let (device, _) = registry
            .register_or_touch("alice", "fp-1", "10.0.0.1")
            .unwrap();
        let table = SessionTable::new(std::time::Duration::from_secs(3600));
        let session = table.create("alice", &device.device_id, "10.0.0.1");
        (device, session)
    }

    #[test]
    fn new_device_from_new_session_scores_forty() {
        let (device, session) = fixtures();
        let ctx = RiskContext {
            device: &device,
            device_is_new: true,
            session: &session,
            current_ip: "10.0.0.1",
            operation_sensitive: false,
            now: Utc::now(),
        };
        // +30 new device, +10 young session; the IP is already known.
        assert_eq!(risk_score(&ctx), 40);
    }

    #[test]
    fn verified_device_discount_applies() {
        let (mut device, session) = fixtures();
        device.verification = VerificationState::Verified;
        let ctx = RiskContext {
            device: &device,
            device_is_new: false,
            session: &session,
            current_ip: "10.0.0.1",
            operation_sensitive: false,
            now: Utc::now() + Duration::minutes(10),
        };
        // −20 verified, nothing else applies; clamped at 0.
        assert_eq!(risk_score(&ctx), 0);
    }

    #[test]
    fn ip_mismatch_and_novel_ip_stack() {
        let (device, session) = fixtures();
        let ctx = RiskContext {
            device: &device,
            device_is_new: false,
            session: &session,
            current_ip: "203.0.113.7",
            operation_sensitive: false,
            now: Utc::now() + Duration::minutes(10),
        };
        // +15 novel IP, +20 origin mismatch.
        assert_eq!(risk_score(&ctx), 35);
    }

    #[test]
    fn attempts_accumulate_and_clamp() {
        let (device, mut session) = fixtures();
        session.verification_attempts = 30;
        let ctx = RiskContext {
            device: &device,
            device_is_new: false,
            session: &session,
            current_ip: "10.0.0.1",
            operation_sensitive: false,
            now: Utc::now() + Duration::minutes(10),
        };
        assert_eq!(risk_score(&ctx), 100);
    }

    #[test]
    fn trust_bands_follow_risk() {
        let (mut device, _session) = fixtures();
        assert_eq!(trust_for(10, &device), TrustLevel::High);
        assert_eq!(trust_for(25, &device), TrustLevel::Medium);
        assert_eq!(trust_for(45, &device), TrustLevel::Low);
        assert_eq!(trust_for(70, &device), TrustLevel::Untrusted);

        device.verification = VerificationState::Verified;
        assert_eq!(trust_for(10, &device), TrustLevel::Verified);
        assert_eq!(trust_for(30, &device), TrustLevel::Medium);
    }

    #[test]
    fn impossible_travel_needs_subsecond_ip_flip() {
        let (device, mut session) = fixtures();
        session.last_ip = "10.0.0.1".into();
        session.last_request_at = Utc::now();

        let ctx = RiskContext {
            device: &device,
            device_is_new: false,
            session: &session,
            current_ip: "203.0.113.7",
            operation_sensitive: false,
            now: Utc::now(),
        };
        let flags = detect_anomalies(&ctx, &[]);
        assert!(flags.contains(&ANOMALY_IP_CHANGE.to_string()));
        assert!(flags.contains(&ANOMALY_IMPOSSIBLE_TRAVEL.to_string()));

        // Same flip two seconds later is only an ip_change.
        let ctx = RiskContext {
            now: Utc::now() + Duration::seconds(2),
            ..ctx
        };
        let flags = detect_anomalies(&ctx, &[]);
        assert!(flags.contains(&ANOMALY_IP_CHANGE.to_string()));
        assert!(!flags.contains(&ANOMALY_IMPOSSIBLE_TRAVEL.to_string()));
    }

    #[test]
    fn sensitive_access_from_barely_verified_device_flags() {
        let (device, session) = fixtures();
        let ctx = RiskContext {
            device: &device,
            device_is_new: false,
            session: &session,
            current_ip: "10.0.0.1",
            operation_sensitive: true,
            now: Utc::now(),
        };
        let flags = detect_anomalies(&ctx, &[]);
        assert!(flags.contains(&ANOMALY_NEW_DEVICE_SENSITIVE.to_string()));
    }

    struct AfterHours;
    impl AnomalyVerifier for AfterHours {
        fn name(&self) -> &str {
            "after_hours"
        }
        fn check(&self, _ctx: &RiskContext<'_>) -> Option<String> {
            Some("after_hours".into())
        }
    }

    #[test]
    fn custom_verifiers_contribute_flags() {
        let (device, session) = fixtures();
        let ctx = RiskContext {
            device: &device,
            device_is_new: false,
            session: &session,
            current_ip: "10.0.0.1",
            operation_sensitive: false,
            now: Utc::now(),
        };
        let verifiers: Vec<Box<dyn AnomalyVerifier>> = vec![Box::new(AfterHours)];
        let flags = detect_anomalies(&ctx, &verifiers);
        assert!(flags.contains(&"after_hours".to_string()));
    }
}
