//! Ephemeral secret injection.
//!
//! Moves a decrypted credential into a container's memory without ever
//! touching disk or the container's environment: the bridge opens a
//! short-lived Unix socket, the agent connects exactly once, the bridge
//! writes one length-prefixed JSON document and tears the socket down.
//! One-time tokens gate the whole flow.

mod socket;
mod tokens;

pub use socket::{SecretInjector, SecretPayload};
pub use tokens::{FormField, OneTimeToken, TokenStore};
