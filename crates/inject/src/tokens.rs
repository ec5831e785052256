//! One-time submission tokens.
//!
//! A token admits exactly one secret submission. Consumption is atomic:
//! the token is marked used under the write lock before any side effect
//! runs, so a concurrent replay always observes the used flag.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wb_domain::types::Provider;
use wb_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One field the submitter must fill in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    /// `"secret"`, `"text"`, or `"url"`.
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

/// A single-use submission token.
#[derive(Debug, Clone, Serialize)]
pub struct OneTimeToken {
    pub id: String,
    pub secret_type: String,
    pub provider: Provider,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub form_schema: Vec<FormField>,
}

impl OneTimeToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe token store with TTL expiry.
pub struct TokenStore {
    tokens: RwLock<HashMap<String, OneTimeToken>>,
    ttl: chrono::Duration,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    /// Mint a token for one submission.
    pub fn generate(
        &self,
        secret_type: impl Into<String>,
        provider: Provider,
        session_id: impl Into<String>,
        form_schema: Vec<FormField>,
    ) -> OneTimeToken {
        let now = Utc::now();
        let token = OneTimeToken {
            id: Uuid::new_v4().to_string(),
            secret_type: secret_type.into(),
            provider,
            session_id: session_id.into(),
            created_at: now,
            expires_at: now + self.ttl,
            used: false,
            form_schema,
        };
        self.tokens.write().insert(token.id.clone(), token.clone());
        tracing::debug!(token = %token.id, provider = %provider, "one-time token issued");
        token
    }

    /// Consume a token atomically. A valid token is marked used before
    /// this returns; the caller performs its side effect afterwards,
    /// knowing no replay can succeed.
    pub fn consume(&self, id: &str) -> Result<OneTimeToken> {
        let mut tokens = self.tokens.write();
        let token = tokens
            .get_mut(id)
            .ok_or_else(|| Error::Token("token not found".into()))?;

        if token.used {
            return Err(Error::Token("token already used".into()));
        }
        if token.is_expired(Utc::now()) {
            return Err(Error::Token("token expired".into()));
        }

        token.used = true;
        Ok(token.clone())
    }

    /// Look up a token without consuming it (form rendering).
    pub fn get(&self, id: &str) -> Option<OneTimeToken> {
        self.tokens.read().get(id).cloned()
    }

    /// Drop expired and already-consumed tokens. Returns how many were
    /// removed. Runs from the broker's background sweep.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| !t.used && !t.is_expired(now));
        before - tokens.len()
    }

    pub fn pending_count(&self) -> usize {
        let now = Utc::now();
        self.tokens
            .read()
            .values()
            .filter(|t| !t.used && !t.is_expired(now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TokenStore {
        TokenStore::new(Duration::from_secs(300))
    }

    #[test]
    fn consume_succeeds_once_then_reports_already_used() {
        let store = store();
        let token = store.generate("api_key", Provider::Openai, "sess-1", vec![]);

        assert!(store.consume(&token.id).is_ok());
        match store.consume(&token.id) {
            Err(Error::Token(msg)) => assert!(msg.contains("already used")),
            other => panic!("expected token error, got {other:?}"),
        }
    }

    #[test]
    fn expired_token_is_rejected() {
        let store = TokenStore::new(Duration::from_millis(0));
        let token = store.generate("api_key", Provider::Anthropic, "sess-1", vec![]);
        std::thread::sleep(Duration::from_millis(5));
        match store.consume(&token.id) {
            Err(Error::Token(msg)) => assert!(msg.contains("expired")),
            other => panic!("expected expiry error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert!(store().consume("nope").is_err());
    }

    #[test]
    fn sweep_removes_used_and_expired() {
        let store = store();
        let used = store.generate("api_key", Provider::Openai, "s", vec![]);
        store.consume(&used.id).unwrap();
        store.generate("api_key", Provider::Openai, "s", vec![]);

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.pending_count(), 1);
    }
}
