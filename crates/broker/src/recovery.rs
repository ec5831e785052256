//! Recovery phrase workflow.
//!
//! Generate an N-word phrase from the embedded wordlist, persist only
//! its SHA-256 hash through the keystore, verify submissions in
//! constant time, and mark the rotation complete.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use wb_domain::types::Provider;
use wb_domain::{Error, Result};
use wb_keystore::Keystore;

/// Credential id under which the phrase hash is stored.
const RECOVERY_CREDENTIAL_ID: &str = "recovery-phrase-hash";
const PHRASE_WORDS: usize = 12;

/// Embedded wordlist. Short on purpose: phrases gate recovery, entropy
/// comes from 12 draws with replacement (~72 bits over 64 words).
const WORDLIST: &[&str] = &[
    "anchor", "basalt", "cedar", "delta", "ember", "fjord", "garnet", "harbor",
    "ingot", "juniper", "kestrel", "lantern", "marble", "nectar", "onyx", "pebble",
    "quartz", "raven", "spruce", "timber", "umber", "vortex", "walnut", "xenon",
    "yarrow", "zephyr", "alder", "birch", "copper", "dune", "elm", "flint",
    "granite", "heather", "iris", "jade", "krill", "larch", "mesa", "nickel",
    "osprey", "pine", "quill", "ridge", "slate", "thistle", "ultra", "vellum",
    "willow", "xylem", "yucca", "zinc", "amber", "bison", "coral", "drift",
    "echo", "fern", "grove", "haze", "inlet", "jasper", "kelp", "loam",
];

pub struct RecoveryManager {
    keystore: Arc<Keystore>,
    /// Hash of the most recently generated, not-yet-stored phrase.
    pending: Mutex<Option<String>>,
    rotation_done: Mutex<bool>,
}

impl RecoveryManager {
    pub fn new(keystore: Arc<Keystore>) -> Self {
        Self {
            keystore,
            pending: Mutex::new(None),
            rotation_done: Mutex::new(false),
        }
    }

    /// Generate a fresh phrase. The phrase itself is returned to the
    /// caller exactly once; only its hash stays in memory.
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let words: Vec<&str> = (0..PHRASE_WORDS)
            .map(|_| WORDLIST[rng.gen_range(0..WORDLIST.len())])
            .collect();
        let phrase = words.join(" ");
        *self.pending.lock() = Some(hash_phrase(&phrase));
        phrase
    }

    /// Persist the pending phrase hash. The submitted phrase must match
    /// what was generated, proving the caller actually recorded it.
    pub fn store(&self, phrase: &str) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| Error::Conflict("no phrase has been generated".into()))?;
        if !constant_time_eq(&hash_phrase(phrase), &pending) {
            *self.pending.lock() = Some(pending);
            return Err(Error::Config(
                "submitted phrase does not match the generated one".into(),
            ));
        }

        // Replace any previous phrase hash.
        let _ = self.keystore.delete_credential(RECOVERY_CREDENTIAL_ID);
        self.keystore.store_credential(
            RECOVERY_CREDENTIAL_ID,
            Provider::Custom,
            "recovery phrase hash",
            vec!["recovery".into()],
            None,
            &pending,
        )?;
        *self.rotation_done.lock() = false;
        tracing::info!("recovery phrase stored");
        Ok(())
    }

    /// Check a submitted phrase against the stored hash.
    pub fn verify(&self, phrase: &str) -> Result<bool> {
        let stored = self.keystore.get_credential(RECOVERY_CREDENTIAL_ID)?;
        let stored_hash = stored
            .plaintext
            .ok_or_else(|| Error::Integrity("stored phrase hash is unreadable".into()))?;
        Ok(constant_time_eq(
            &hash_phrase(phrase),
            stored_hash.expose(),
        ))
    }

    /// Mark the recovery rotation complete.
    pub fn complete(&self) -> Result<()> {
        // Completing requires a stored phrase.
        self.keystore.get_credential(RECOVERY_CREDENTIAL_ID)?;
        *self.rotation_done.lock() = true;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        *self.rotation_done.lock()
    }
}

fn hash_phrase(phrase: &str) -> String {
    hex::encode(Sha256::digest(phrase.trim().to_lowercase().as_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wb_domain::config::KeystoreConfig;
    use wb_keystore::MachineIdentity;

    fn manager(dir: &std::path::Path) -> RecoveryManager {
        let keystore = Keystore::open_with_identity(
            &KeystoreConfig {
                path: dir.join("keystore.json").display().to_string(),
                salt_path: dir.join("master.salt").display().to_string(),
                kdf_memory_kib: 8 * 1024,
                kdf_time_cost: 1,
                kdf_parallelism: 1,
            },
            &MachineIdentity::fixed("mid", "", ""),
        )
        .unwrap();
        RecoveryManager::new(Arc::new(keystore))
    }

    #[test]
    fn generate_store_verify_complete() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());

        let phrase = mgr.generate();
        assert_eq!(phrase.split_whitespace().count(), 12);

        mgr.store(&phrase).unwrap();
        assert!(mgr.verify(&phrase).unwrap());
        assert!(!mgr.verify("wrong words entirely").unwrap());

        mgr.complete().unwrap();
        assert!(mgr.is_complete());
    }

    #[test]
    fn store_rejects_a_mistyped_phrase() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let _phrase = mgr.generate();
        assert!(mgr.store("not the phrase").is_err());
    }

    #[test]
    fn verify_is_case_and_whitespace_tolerant() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let phrase = mgr.generate();
        mgr.store(&phrase).unwrap();
        assert!(mgr.verify(&format!("  {}  ", phrase.to_uppercase())).unwrap());
    }

    #[test]
    fn complete_without_stored_phrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        assert!(mgr.complete().is_err());
    }
}
