//! Device fingerprinting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The composite a client submits to identify its device. The stable
/// hash over these fields is the device's identity; resubmitting the
/// same composite resolves to the same device.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FingerprintInput {
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub platform: String,
    /// e.g. `"2560x1440x24"`.
    #[serde(default)]
    pub screen: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub canvas_hash: String,
    #[serde(default)]
    pub webgl_hash: String,
    #[serde(default)]
    pub audio_hash: String,
    #[serde(default)]
    pub fonts: Vec<String>,
}

impl FingerprintInput {
    /// SHA-256 over the canonical composite. List fields are sorted so
    /// enumeration order on the client cannot change the identity; the
    /// field separator cannot occur in the inputs.
    pub fn stable_hash(&self) -> String {
        let mut plugins = self.plugins.clone();
        plugins.sort();
        let mut fonts = self.fonts.clone();
        fonts.sort();

        let composite = [
            self.user_agent.as_str(),
            self.platform.as_str(),
            self.screen.as_str(),
            self.timezone.as_str(),
            self.language.as_str(),
            &plugins.join(","),
            self.canvas_hash.as_str(),
            self.webgl_hash.as_str(),
            self.audio_hash.as_str(),
            &fonts.join(","),
        ]
        .join("\u{1f}");

        hex::encode(Sha256::digest(composite.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> FingerprintInput {
        FingerprintInput {
            user_agent: "Mozilla/5.0".into(),
            platform: "Linux x86_64".into(),
            screen: "2560x1440x24".into(),
            timezone: "Europe/Berlin".into(),
            language: "en-US".into(),
            plugins: vec!["pdf".into(), "webauthn".into()],
            canvas_hash: "c4nv4s".into(),
            webgl_hash: "w3bgl".into(),
            audio_hash: "4ud10".into(),
            fonts: vec!["Inter".into(), "Fira Code".into()],
        }
    }

    #[test]
    fn resubmission_is_stable() {
        assert_eq!(input().stable_hash(), input().stable_hash());
    }

    #[test]
    fn plugin_order_does_not_change_identity() {
        let mut reordered = input();
        reordered.plugins.reverse();
        assert_eq!(input().stable_hash(), reordered.stable_hash());
    }

    #[test]
    fn any_field_change_changes_identity() {
        let mut other = input();
        other.timezone = "America/New_York".into();
        assert_ne!(input().stable_hash(), other.stable_hash());
    }
}
