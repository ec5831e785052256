//! Session table.
//!
//! A session binds one user to one device. Sessions are created when a
//! request first arrives, updated on every request, and invalidated on
//! logout, lockout, or TTL. The table stores device ids, not device
//! references; the manager owns both tables and joins them by id.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use wb_domain::types::TrustLevel;
use wb_domain::{Error, Result};

/// How long an MFA confirmation counts as "recent".
const MFA_RECENCY_MINUTES: i64 = 15;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
    pub origin_ip: String,
    pub trust: TrustLevel,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verification_attempts: u32,
    pub locked_out: bool,
    pub lockout_until: Option<DateTime<Utc>>,
    pub risk_score: u8,
    pub anomaly_flags: Vec<String>,
    /// IP of the most recent request (origin_ip never changes).
    pub last_ip: String,
    pub last_request_at: DateTime<Utc>,
    pub mfa_verified_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_out && self.lockout_until.map_or(true, |until| now < until)
    }

    pub fn has_recent_mfa(&self, now: DateTime<Utc>) -> bool {
        self.mfa_verified_at
            .map_or(false, |at| now.signed_duration_since(at)
                < Duration::minutes(MFA_RECENCY_MINUTES))
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
    }
}

pub struct SessionTable {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionTable {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(12)),
        }
    }

    /// Create a session binding `user_id` to `device_id`.
    pub fn create(&self, user_id: &str, device_id: &str, ip: &str) -> Session {
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            origin_ip: ip.to_string(),
            trust: TrustLevel::Untrusted,
            created_at: now,
            last_activity: now,
            expires_at: now + self.ttl,
            verification_attempts: 0,
            locked_out: false,
            lockout_until: None,
            risk_score: 0,
            anomaly_flags: Vec::new(),
            last_ip: ip.to_string(),
            last_request_at: now,
            mfa_verified_at: None,
        };
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        tracing::debug!(session = %session.session_id, user = %user_id, "session created");
        session
    }

    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::not_found("session", session_id))
    }

    /// Apply a mutation under the write lock and return the new state.
    pub fn update(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session),
    ) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;
        f(session);
        session.last_activity = Utc::now();
        Ok(session.clone())
    }

    /// Record a fresh MFA confirmation.
    pub fn record_mfa(&self, session_id: &str) -> Result<Session> {
        self.update(session_id, |s| s.mfa_verified_at = Some(Utc::now()))
    }

    /// Invalidate on logout.
    pub fn remove(&self, session_id: &str) -> Result<()> {
        self.sessions
            .write()
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("session", session_id))
    }

    /// Drop expired sessions and clear lockouts that have run out.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        for session in sessions.values_mut() {
            if session.locked_out && session.lockout_until.map_or(false, |u| now >= u) {
                session.locked_out = false;
                session.lockout_until = None;
                session.verification_attempts = 0;
            }
        }
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_expires() {
        let table = SessionTable::new(std::time::Duration::from_secs(3600));
        let session = table.create("alice", "dev-1", "10.0.0.1");

        table
            .update(&session.session_id, |s| {
                s.locked_out = true;
                s.lockout_until = Some(Utc::now() - Duration::minutes(1));
            })
            .unwrap();

        // Lockout deadline is in the past.
        let s = table.get(&session.session_id).unwrap();
        assert!(!s.is_locked(Utc::now()));

        // Sweep clears the flag and the attempt counter.
        table.sweep();
        let s = table.get(&session.session_id).unwrap();
        assert!(!s.locked_out);
        assert_eq!(s.verification_attempts, 0);
    }

    #[test]
    fn expired_sessions_are_swept() {
        let table = SessionTable::new(std::time::Duration::from_millis(0));
        table.create("alice", "dev-1", "10.0.0.1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(table.sweep(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn mfa_recency_window() {
        let table = SessionTable::new(std::time::Duration::from_secs(3600));
        let session = table.create("alice", "dev-1", "10.0.0.1");
        assert!(!session.has_recent_mfa(Utc::now()));

        let session = table.record_mfa(&session.session_id).unwrap();
        assert!(session.has_recent_mfa(Utc::now()));
        assert!(!session.has_recent_mfa(Utc::now() + Duration::minutes(16)));
    }
}
