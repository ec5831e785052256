//! Offline license validation.
//!
//! Keys have the shape `WB-<tier>-<expiry unix>-<mac>` where the MAC is
//! HMAC-SHA256 over `<tier>-<expiry>` under the embedded verification
//! key, hex-encoded and truncated. Validation is fully offline.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use wb_domain::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Verification key baked into the binary; rotating it invalidates all
/// issued keys.
const VERIFY_KEY: &[u8] = b"wardbridge-license-verify-2026";
const MAC_HEX_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseTier {
    Free,
    Pro,
    Enterprise,
}

impl LicenseTier {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    pub fn features(&self) -> Vec<&'static str> {
        match self {
            Self::Free => vec!["core"],
            Self::Pro => vec!["core", "voice", "bridges"],
            Self::Enterprise => vec!["core", "voice", "bridges", "plugins", "sso"],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseStatus {
    pub valid: bool,
    pub tier: LicenseTier,
    pub expires_at: Option<DateTime<Utc>>,
    pub features: Vec<&'static str>,
}

pub struct LicenseManager {
    key: RwLock<Option<String>>,
}

impl LicenseManager {
    pub fn new(key: &str) -> Self {
        Self {
            key: RwLock::new(if key.is_empty() {
                None
            } else {
                Some(key.to_string())
            }),
        }
    }

    /// Mint a key for issuance tooling and tests.
    pub fn mint(tier: &str, expires_at: DateTime<Utc>) -> String {
        let payload = format!("{tier}-{}", expires_at.timestamp());
        format!("WB-{payload}-{}", Self::mac(&payload))
    }

    fn mac(payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(VERIFY_KEY).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())[..MAC_HEX_LEN].to_string()
    }

    /// Validate a key string without installing it.
    pub fn validate(&self, key: &str) -> Result<LicenseStatus> {
        let rest = key
            .strip_prefix("WB-")
            .ok_or_else(|| Error::Config("license key must start with WB-".into()))?;

        let mut parts = rest.rsplitn(2, '-');
        let mac = parts.next().unwrap_or_default();
        let payload = parts.next().unwrap_or_default();

        let expected = Self::mac(payload);
        if !bool::from(expected.as_bytes().ct_eq(mac.as_bytes())) {
            return Err(Error::Config("license signature does not verify".into()));
        }

        let (tier_raw, expiry_raw) = payload
            .split_once('-')
            .ok_or_else(|| Error::Config("malformed license payload".into()))?;
        let tier = LicenseTier::parse(tier_raw)
            .ok_or_else(|| Error::Config(format!("unknown license tier '{tier_raw}'")))?;
        let expiry = expiry_raw
            .parse::<i64>()
            .ok()
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .ok_or_else(|| Error::Config("malformed license expiry".into()))?;

        let valid = expiry > Utc::now();
        Ok(LicenseStatus {
            valid,
            tier,
            expires_at: Some(expiry),
            features: if valid {
                tier.features()
            } else {
                LicenseTier::Free.features()
            },
        })
    }

    /// Status of the installed key (free tier when none or invalid).
    pub fn status(&self) -> LicenseStatus {
        let key = self.key.read().clone();
        match key {
            Some(key) => self.validate(&key).unwrap_or(LicenseStatus {
                valid: false,
                tier: LicenseTier::Free,
                expires_at: None,
                features: LicenseTier::Free.features(),
            }),
            None => LicenseStatus {
                valid: false,
                tier: LicenseTier::Free,
                expires_at: None,
                features: LicenseTier::Free.features(),
            },
        }
    }

    pub fn features(&self) -> Vec<&'static str> {
        self.status().features
    }

    /// Install a key after validating it.
    pub fn set_key(&self, key: &str) -> Result<LicenseStatus> {
        let status = self.validate(key)?;
        if !status.valid {
            return Err(Error::Config("license key has expired".into()));
        }
        *self.key.write() = Some(key.to_string());
        tracing::info!(tier = ?status.tier, "license key installed");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn minted_keys_validate_to_their_tier() {
        let mgr = LicenseManager::new("");
        let key = LicenseManager::mint("pro", Utc::now() + Duration::days(30));
        let status = mgr.validate(&key).unwrap();
        assert!(status.valid);
        assert_eq!(status.tier, LicenseTier::Pro);
        assert!(status.features.contains(&"voice"));
    }

    #[test]
    fn tampered_key_fails() {
        let mgr = LicenseManager::new("");
        let key = LicenseManager::mint("enterprise", Utc::now() + Duration::days(30));
        let tampered = key.replace("enterprise", "free");
        assert!(mgr.validate(&tampered).is_err());
    }

    #[test]
    fn expired_key_downgrades_to_free_features() {
        let mgr = LicenseManager::new("");
        let key = LicenseManager::mint("pro", Utc::now() - Duration::days(1));
        let status = mgr.validate(&key).unwrap();
        assert!(!status.valid);
        assert_eq!(status.features, vec!["core"]);
        assert!(mgr.set_key(&key).is_err());
    }

    #[test]
    fn no_key_is_free_tier() {
        let mgr = LicenseManager::new("");
        let status = mgr.status();
        assert_eq!(status.tier, LicenseTier::Free);
        assert!(!status.valid);
    }
}
