//! Hardware-bound credential keystore.
//!
//! Credentials are encrypted at rest with AES-256-GCM under a master key
//! derived (Argon2id) from a composite of machine identifiers and a
//! persisted random salt. Copying the store file to another machine
//! yields a key that cannot decrypt it.

mod credential;
mod machine;
mod master;
mod store;

pub use credential::{Credential, CredentialFilter, SecretString};
pub use machine::MachineIdentity;
pub use master::MasterKey;
pub use store::Keystore;
