//! Master-key derivation and the persisted salt.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use wb_domain::config::KeystoreConfig;
use wb_domain::{Error, Result};

use crate::machine::MachineIdentity;

const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;

/// The derived AES-256 master key. Held in memory for the process
/// lifetime and zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Derive the key from the machine composite and the persisted salt
    /// using Argon2id with the configured (operator-tunable) costs.
    pub fn derive(identity: &MachineIdentity, config: &KeystoreConfig) -> Result<Self> {
        let salt = load_or_create_salt(Path::new(&config.salt_path))?;

        let params = Params::new(
            config.kdf_memory_kib,
            config.kdf_time_cost,
            config.kdf_parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| Error::Config(format!("invalid KDF parameters: {e}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut composite = identity.composite();
        let mut bytes = [0u8; KEY_LEN];
        argon
            .hash_password_into(&composite, &salt, &mut bytes)
            .map_err(|e| Error::Config(format!("master key derivation failed: {e}")))?;
        composite.zeroize();

        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Read the salt file, or create it (0600) with fresh CSPRNG bytes on
/// first run.
fn load_or_create_salt(path: &Path) -> Result<Vec<u8>> {
    if path.exists() {
        let raw = std::fs::read(path).map_err(Error::Io)?;
        if raw.len() != SALT_LEN {
            return Err(Error::Integrity(format!(
                "salt file {} has unexpected length {}",
                path.display(),
                raw.len()
            )));
        }
        return Ok(raw);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    std::fs::write(path, &salt).map_err(Error::Io)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(Error::Io)?;
    tracing::info!(path = %path.display(), "master-key salt created");
    Ok(salt)
}
