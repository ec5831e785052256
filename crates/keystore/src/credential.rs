//! Credential records and the zeroizing plaintext wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use wb_domain::types::Provider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Secret wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decrypted credential material. Zeroized on drop, elided in Debug,
/// and deliberately not serializable.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Expose the secret. Callers keep the borrow inside one call scope.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(..)")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A credential as seen by callers: metadata always, plaintext only when
/// the keystore decrypted it for this call.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub provider: Provider,
    pub display_name: String,
    pub tags: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Present on `get`, absent on `list`.
    pub plaintext: Option<SecretString>,
}

/// Filter for `list_credentials`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialFilter {
    pub provider: Option<Provider>,
    pub tag: Option<String>,
    /// Include credentials whose expiry has passed (default false).
    #[serde(default)]
    pub include_expired: bool,
}

/// The at-rest form of a credential. Ciphertext and nonce are hex;
/// `plaintext_hash` is the SHA-256 of the plaintext used to detect
/// tampering after decrypt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredCredential {
    pub id: String,
    pub provider: Provider,
    pub display_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub ciphertext: String,
    pub nonce: String,
    pub plaintext_hash: String,
}

impl StoredCredential {
    pub fn metadata(&self) -> Credential {
        Credential {
            id: self.id.clone(),
            provider: self.provider,
            display_name: self.display_name.clone(),
            tags: self.tags.clone(),
            expires_at: self.expires_at,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            plaintext: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |exp| exp <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_debug_is_elided() {
        let secret = SecretString::new("sk-live-abcdef".into());
        assert_eq!(format!("{secret:?}"), "SecretString(..)");
    }
}
