//! Audit entry types and canonical hashing.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use wb_domain::types::Severity;
use wb_domain::{Error, Result};

/// Previous-hash value for the first entry of a chain.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who performed the audited action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditActor {
    /// `"user"`, `"agent"`, `"system"`, or `"admin"`.
    pub actor_type: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl AuditActor {
    pub fn system() -> Self {
        Self {
            actor_type: "system".into(),
            id: "wardbridge".into(),
            ip: None,
        }
    }

    pub fn user(id: impl Into<String>, ip: Option<String>) -> Self {
        Self {
            actor_type: "user".into(),
            id: id.into(),
            ip,
        }
    }
}

/// What the audited action touched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditResource {
    pub resource_type: String,
    pub id: String,
}

impl AuditResource {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

/// Compliance grading attached to every entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComplianceFlags {
    /// `"security"`, `"phi"`, `"lifecycle"`, `"access"`, …
    pub category: String,
    pub severity: Severity,
    pub audit_required: bool,
}

impl Default for ComplianceFlags {
    fn default() -> Self {
        Self {
            category: "access".into(),
            severity: Severity::Low,
            audit_required: true,
        }
    }
}

/// The caller-supplied portion of an entry. Sequence, timestamp, and the
/// hash pair are assigned by [`crate::AuditLog::append`].
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: String,
    pub actor: AuditActor,
    pub action: String,
    pub resource: AuditResource,
    pub detail: serde_json::Value,
    pub compliance: ComplianceFlags,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        actor: AuditActor,
        action: impl Into<String>,
        resource: AuditResource,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor,
            action: action.into(),
            resource,
            detail: serde_json::Value::Null,
            compliance: ComplianceFlags::default(),
        }
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn compliance(mut self, category: impl Into<String>, severity: Severity) -> Self {
        self.compliance = ComplianceFlags {
            category: category.into(),
            severity,
            audit_required: true,
        };
        self
    }
}

/// A committed, chain-linked audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub actor: AuditActor,
    pub action: String,
    pub resource: AuditResource,
    pub detail: serde_json::Value,
    pub compliance: ComplianceFlags,
    pub prev_hash: String,
    pub this_hash: String,
}

impl AuditEntry {
    /// Canonical bytes of this entry: every field except `this_hash`,
    /// serialized as a JSON object with sorted keys and millisecond
    /// timestamp precision.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        // serde_json's default map is a BTreeMap, so key order is sorted
        // at every nesting level once the entry passes through Value.
        let value = serde_json::json!({
            "sequence": self.sequence,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "event_type": self.event_type,
            "actor": serde_json::to_value(&self.actor)?,
            "action": self.action,
            "resource": serde_json::to_value(&self.resource)?,
            "detail": self.detail,
            "compliance": serde_json::to_value(&self.compliance)?,
            "prev_hash": self.prev_hash,
        });
        Ok(serde_json::to_vec(&value)?)
    }

    /// `SHA-256(prev_hash_hex || canonical_bytes)`, hex-encoded.
    pub fn compute_hash(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.canonical_bytes()?);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Check the stored hash against a recomputation over the stored
    /// fields.
    pub fn verify_hash(&self) -> Result<()> {
        let expected = self.compute_hash()?;
        if expected != self.this_hash {
            return Err(Error::Integrity(format!(
                "audit entry {} hash mismatch",
                self.sequence
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sequence: u64, prev_hash: &str) -> AuditEntry {
        let mut entry = AuditEntry {
            sequence,
            timestamp: Utc::now(),
            event_type: "credential".into(),
            actor: AuditActor::system(),
            action: "store".into(),
            resource: AuditResource::new("credential", "cred-1"),
            detail: serde_json::json!({"provider": "openai"}),
            compliance: ComplianceFlags::default(),
            prev_hash: prev_hash.into(),
            this_hash: String::new(),
        };
        entry.this_hash = entry.compute_hash().unwrap();
        entry
    }

    #[test]
    fn canonical_bytes_are_stable() {
        let entry = sample(0, GENESIS_HASH);
        assert_eq!(
            entry.canonical_bytes().unwrap(),
            entry.canonical_bytes().unwrap()
        );
    }

    #[test]
    fn hash_covers_predecessor() {
        let a = sample(0, GENESIS_HASH);
        let b = sample(0, &a.this_hash);
        assert_ne!(a.this_hash, b.this_hash);
    }

    #[test]
    fn mutation_breaks_verification() {
        let mut entry = sample(0, GENESIS_HASH);
        entry.verify_hash().unwrap();
        entry.action = "delete".into();
        assert!(entry.verify_hash().is_err());
    }
}
