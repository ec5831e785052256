//! The encrypted store file and its operations.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::Utc;
use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use wb_domain::config::KeystoreConfig;
use wb_domain::types::Provider;
use wb_domain::{Error, Result};

use crate::credential::{Credential, CredentialFilter, SecretString, StoredCredential};
use crate::machine::MachineIdentity;
use crate::master::MasterKey;

const NONCE_LEN: usize = 12;

/// Encrypted credential store. Single writer, concurrent readers.
pub struct Keystore {
    path: PathBuf,
    key: MasterKey,
    records: RwLock<HashMap<String, StoredCredential>>,
}

impl Keystore {
    /// Derive the master key for this machine and load (or create) the
    /// store file.
    pub fn open(config: &KeystoreConfig) -> Result<Self> {
        let identity = MachineIdentity::collect()?;
        Self::open_with_identity(config, &identity)
    }

    /// Open with an explicit machine identity (tests, migration tooling).
    pub fn open_with_identity(
        config: &KeystoreConfig,
        identity: &MachineIdentity,
    ) -> Result<Self> {
        let key = MasterKey::derive(identity, config)?;
        let path = PathBuf::from(&config.path);

        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw)?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(Error::Io)?;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                    .map_err(Error::Io)?;
            }
            HashMap::new()
        };

        tracing::info!(
            credentials = records.len(),
            path = %path.display(),
            "keystore opened"
        );

        Ok(Self {
            path,
            key,
            records: RwLock::new(records),
        })
    }

    // ── raw encryption ──────────────────────────────────────────────

    /// Encrypt `plaintext` under the master key with a fresh nonce.
    /// Returns `(ciphertext, nonce)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| Error::Integrity("encryption failed".into()))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    /// Decrypt a `(ciphertext, nonce)` pair produced by [`Self::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            return Err(Error::Integrity("nonce has unexpected length".into()));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                Error::Integrity(
                    "decrypt failed: wrong machine key or tampered record".into(),
                )
            })
    }

    // ── credential operations ───────────────────────────────────────

    /// Encrypt and persist a credential. Returns the stored metadata.
    pub fn store_credential(
        &self,
        id: &str,
        provider: Provider,
        display_name: &str,
        tags: Vec<String>,
        expires_at: Option<chrono::DateTime<Utc>>,
        plaintext: &str,
    ) -> Result<Credential> {
        if id.is_empty() {
            return Err(Error::Config("credential id must not be empty".into()));
        }

        let (ciphertext, nonce) = self.encrypt(plaintext.as_bytes())?;
        let plaintext_hash = hex::encode(Sha256::digest(plaintext.as_bytes()));

        let record = StoredCredential {
            id: id.to_string(),
            provider,
            display_name: display_name.to_string(),
            tags,
            expires_at,
            created_at: Utc::now(),
            last_used_at: None,
            ciphertext: hex::encode(ciphertext),
            nonce: hex::encode(nonce),
            plaintext_hash,
        };
        let metadata = record.metadata();

        {
            let mut records = self.records.write();
            if records.contains_key(id) {
                return Err(Error::Conflict(format!("credential '{id}' already exists")));
            }
            records.insert(id.to_string(), record);
            self.persist(&records)?;
        }

        tracing::info!(credential = %id, provider = %provider, "credential stored");
        Ok(metadata)
    }

    /// List credential metadata matching the filter. Never decrypts.
    pub fn list_credentials(&self, filter: &CredentialFilter) -> Vec<Credential> {
        let now = Utc::now();
        let records = self.records.read();
        let mut out: Vec<Credential> = records
            .values()
            .filter(|r| filter.provider.map_or(true, |p| r.provider == p))
            .filter(|r| {
                filter
                    .tag
                    .as_ref()
                    .map_or(true, |t| r.tags.iter().any(|have| have == t))
            })
            .filter(|r| filter.include_expired || !r.is_expired(now))
            .map(|r| r.metadata())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Decrypt and return a credential with its plaintext. Fails for
    /// unknown ids, past-expiry credentials, and tampered records.
    pub fn get_credential(&self, id: &str) -> Result<Credential> {
        let record = {
            let records = self.records.read();
            records
                .get(id)
                .cloned()
                .ok_or_else(|| Error::not_found("credential", id))?
        };

        if record.is_expired(Utc::now()) {
            return Err(Error::Conflict(format!("credential '{id}' has expired")));
        }

        let ciphertext = hex::decode(&record.ciphertext)
            .map_err(|_| Error::Integrity("ciphertext is not valid hex".into()))?;
        let nonce = hex::decode(&record.nonce)
            .map_err(|_| Error::Integrity("nonce is not valid hex".into()))?;

        let mut plaintext_bytes = self.decrypt(&ciphertext, &nonce)?;

        let hash = hex::encode(Sha256::digest(&plaintext_bytes));
        if hash != record.plaintext_hash {
            plaintext_bytes.zeroize();
            return Err(Error::Integrity(format!(
                "credential '{id}' failed integrity verification"
            )));
        }

        let plaintext = String::from_utf8(plaintext_bytes)
            .map_err(|_| Error::Integrity("plaintext is not valid UTF-8".into()))?;

        let mut metadata = {
            let mut records = self.records.write();
            if let Some(rec) = records.get_mut(id) {
                rec.last_used_at = Some(Utc::now());
            }
            self.persist(&records)?;
            records
                .get(id)
                .map(|r| r.metadata())
                .ok_or_else(|| Error::not_found("credential", id))?
        };
        metadata.plaintext = Some(SecretString::new(plaintext));
        Ok(metadata)
    }

    /// Remove a credential. The ciphertext is gone after the next
    /// persist; there is no undo.
    pub fn delete_credential(&self, id: &str) -> Result<()> {
        let mut records = self.records.write();
        if records.remove(id).is_none() {
            return Err(Error::not_found("credential", id));
        }
        self.persist(&records)?;
        tracing::info!(credential = %id, "credential deleted");
        Ok(())
    }

    // ── persistence ────────────────────────────────────────────────

    /// Write the store atomically (temp file + rename), mode 0600.
    fn persist(&self, records: &HashMap<String, StoredCredential>) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &std::path::Path) -> Keystore {
        let config = KeystoreConfig {
            path: dir.join("keystore.json").display().to_string(),
            salt_path: dir.join("master.salt").display().to_string(),
            kdf_memory_kib: 8 * 1024,
            kdf_time_cost: 1,
            kdf_parallelism: 1,
        };
        Keystore::open_with_identity(&config, &MachineIdentity::fixed("mid", "uuid", "aa:bb"))
            .unwrap()
    }

    #[test]
    fn store_then_get_round_trips_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .store_credential(
                "openai-key-1",
                Provider::Openai,
                "OpenAI prod",
                vec!["prod".into()],
                None,
                "sk-live-roundtrip",
            )
            .unwrap();

        let cred = store.get_credential("openai-key-1").unwrap();
        assert_eq!(cred.plaintext.unwrap().expose(), "sk-live-roundtrip");
        assert!(cred.last_used_at.is_some());
    }

    #[test]
    fn plaintext_never_lands_in_the_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store
            .store_credential(
                "k",
                Provider::Anthropic,
                "key",
                vec![],
                None,
                "super-secret-value",
            )
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("keystore.json")).unwrap();
        assert!(!raw.contains("super-secret-value"));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(matches!(
            store.get_credential("missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn expired_credential_get_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store
            .store_credential(
                "old",
                Provider::Google,
                "expired",
                vec![],
                Some(Utc::now() - chrono::Duration::hours(1)),
                "gone",
            )
            .unwrap();

        assert!(store.get_credential("old").is_err());
        // Still listed when explicitly asked for expired entries.
        let all = store.list_credentials(&CredentialFilter {
            include_expired: true,
            ..Default::default()
        });
        assert_eq!(all.len(), 1);
        let live = store.list_credentials(&CredentialFilter::default());
        assert!(live.is_empty());
    }

    #[test]
    fn tampered_ciphertext_fails_with_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store
                .store_credential("k", Provider::Xai, "key", vec![], None, "value")
                .unwrap();
        }

        // Flip bytes inside the stored ciphertext hex.
        let path = dir.path().join("keystore.json");
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut records: HashMap<String, StoredCredential> =
            serde_json::from_str(&raw).unwrap();
        let rec = records.get_mut("k").unwrap();
        rec.ciphertext = {
            let mut bytes = hex::decode(&rec.ciphertext).unwrap();
            bytes[0] ^= 0xff;
            hex::encode(bytes)
        };
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let store = open_store(dir.path());
        assert!(matches!(
            store.get_credential("k"),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn store_file_from_another_machine_does_not_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeystoreConfig {
            path: dir.path().join("keystore.json").display().to_string(),
            salt_path: dir.path().join("master.salt").display().to_string(),
            kdf_memory_kib: 8 * 1024,
            kdf_time_cost: 1,
            kdf_parallelism: 1,
        };

        {
            let store = Keystore::open_with_identity(
                &config,
                &MachineIdentity::fixed("machine-a", "", ""),
            )
            .unwrap();
            store
                .store_credential("k", Provider::Openai, "key", vec![], None, "value")
                .unwrap();
        }

        // Same file, same salt, different machine identity.
        let store = Keystore::open_with_identity(
            &config,
            &MachineIdentity::fixed("machine-b", "", ""),
        )
        .unwrap();
        assert!(matches!(
            store.get_credential("k"),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn duplicate_id_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store
            .store_credential("k", Provider::Openai, "key", vec![], None, "v1")
            .unwrap();
        assert!(matches!(
            store.store_credential("k", Provider::Openai, "key", vec![], None, "v2"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn store_file_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store
            .store_credential("k", Provider::Openai, "key", vec![], None, "v")
            .unwrap();
        let meta = std::fs::metadata(dir.path().join("keystore.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
