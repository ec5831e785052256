//! Device verification requests.
//!
//! Created when a new device needs vetting, resolved by approve, reject,
//! or timeout, deleted on resolution.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use wb_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    AdminApproval,
    SecondFactor,
    WaitPeriod,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationRequest {
    pub id: String,
    pub device_id: String,
    pub user_id: String,
    pub method: VerificationMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decision: Option<VerificationDecision>,
    pub decided_by: Option<String>,
}

pub struct VerificationStore {
    pending: RwLock<HashMap<String, VerificationRequest>>,
    ttl: Duration,
}

impl VerificationStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    /// Open a request for a device. One open request per device at a
    /// time; a second create returns the existing one.
    pub fn create(
        &self,
        device_id: &str,
        user_id: &str,
        method: VerificationMethod,
    ) -> VerificationRequest {
        let mut pending = self.pending.write();
        if let Some(existing) = pending
            .values()
            .find(|r| r.device_id == device_id && r.decision.is_none())
        {
            return existing.clone();
        }

        let now = Utc::now();
        let request = VerificationRequest {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            method,
            created_at: now,
            expires_at: now + self.ttl,
            decision: None,
            decided_by: None,
        };
        pending.insert(request.id.clone(), request.clone());
        tracing::info!(
            request = %request.id,
            device = %device_id,
            method = ?method,
            "verification request opened"
        );
        request
    }

    /// Resolve a request. The resolved request is removed from the
    /// store and returned for the caller to act on.
    pub fn resolve(
        &self,
        request_id: &str,
        decision: VerificationDecision,
        decided_by: &str,
    ) -> Result<VerificationRequest> {
        let mut pending = self.pending.write();
        let mut request = pending
            .remove(request_id)
            .ok_or_else(|| Error::not_found("verification request", request_id))?;

        if request.expires_at <= Utc::now() {
            return Err(Error::Token("verification request has expired".into()));
        }
        request.decision = Some(decision);
        request.decided_by = Some(decided_by.to_string());
        Ok(request)
    }

    pub fn list_pending(&self) -> Vec<VerificationRequest> {
        let now = Utc::now();
        self.pending
            .read()
            .values()
            .filter(|r| r.expires_at > now)
            .cloned()
            .collect()
    }

    /// Drop requests that timed out unresolved. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.write();
        let before = pending.len();
        pending.retain(|_, r| r.expires_at > now);
        before - pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_create_returns_existing_request() {
        let store = VerificationStore::new(std::time::Duration::from_secs(60));
        let a = store.create("dev-1", "alice", VerificationMethod::AdminApproval);
        let b = store.create("dev-1", "alice", VerificationMethod::SecondFactor);
        assert_eq!(a.id, b.id);
        assert_eq!(store.list_pending().len(), 1);
    }

    #[test]
    fn resolution_removes_the_request() {
        let store = VerificationStore::new(std::time::Duration::from_secs(60));
        let request = store.create("dev-1", "alice", VerificationMethod::AdminApproval);

        let resolved = store
            .resolve(&request.id, VerificationDecision::Approved, "admin")
            .unwrap();
        assert_eq!(resolved.decision, Some(VerificationDecision::Approved));
        assert!(store.list_pending().is_empty());
        assert!(store
            .resolve(&request.id, VerificationDecision::Approved, "admin")
            .is_err());
    }

    #[test]
    fn timed_out_requests_are_swept() {
        let store = VerificationStore::new(std::time::Duration::from_millis(0));
        store.create("dev-1", "alice", VerificationMethod::WaitPeriod);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.sweep(), 1);
    }
}
