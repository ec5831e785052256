mod audit;
mod containers;
mod inject;
mod keystore;
mod license;
mod matrix;
mod scrubber;
mod server;
mod voice;
mod zerotrust;

pub use audit::*;
pub use containers::*;
pub use inject::*;
pub use keystore::*;
pub use license::*;
pub use matrix::*;
pub use scrubber::*;
pub use server::*;
pub use voice::*;
pub use zerotrust::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub containers: ContainersConfig,
    #[serde(default)]
    pub inject: InjectConfig,
    #[serde(default)]
    pub zerotrust: ZeroTrustConfig,
    #[serde(default)]
    pub scrubber: ScrubberConfig,
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub license: LicenseConfig,
}

impl Config {
    /// Parse the config file at `path`, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
            toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables override the file for the handful of values
    /// operators routinely set per-host or keep out of the file entirely.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WB_SOCKET") {
            self.server.socket_path = v;
        }
        if let Ok(v) = std::env::var("WB_STATE_DIR") {
            self.keystore.path = format!("{v}/keystore.json");
            self.keystore.salt_path = format!("{v}/master.salt");
            self.audit.path = format!("{v}/audit.jsonl");
            self.server.configs_dir = format!("{v}/configs");
        }
        if let Ok(v) = std::env::var("WB_SECRET_SOCKET_DIR") {
            self.inject.socket_dir = v;
        }
        if let Ok(v) = std::env::var("WB_MATRIX_ACCESS_TOKEN") {
            self.matrix.access_token = v;
        }
        if let Ok(v) = std::env::var("WB_MATRIX_REFRESH_TOKEN") {
            self.matrix.refresh_token = v;
        }
        if let Ok(v) = std::env::var("WB_TURN_SECRET") {
            self.voice.turn_secret = v;
        }
        if let Ok(v) = std::env::var("WB_LICENSE_KEY") {
            self.license.key = v;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.socket_path.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.socket_path".into(),
                message: "control socket path must not be empty".into(),
            });
        }

        if self.keystore.path.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "keystore.path".into(),
                message: "keystore path must not be empty".into(),
            });
        }

        if self.keystore.kdf_memory_kib < 8 * 1024 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "keystore.kdf_memory_kib".into(),
                message: "KDF memory below 8 MiB weakens the master key".into(),
            });
        }

        if self.audit.retention_days == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "audit.retention_days".into(),
                message: "retention must be at least one day".into(),
            });
        }

        if self.containers.allowed_digests.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "containers.allowed_digests".into(),
                message: "no image digests allow-listed; container creation will be refused"
                    .into(),
            });
        }

        if self.containers.check_interval_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "containers.check_interval_secs".into(),
                message: "reaper interval must be greater than 0".into(),
            });
        }

        if self.zerotrust.max_verification_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "zerotrust.max_verification_attempts".into(),
                message: "attempt limit must be greater than 0".into(),
            });
        }

        if (self.scrubber.quarantine_enabled || self.scrubber.notify_on_quarantine)
            && self.scrubber.mode == ScrubMode::Streaming
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "scrubber.mode".into(),
                message: "quarantine requires buffered mode; streaming will be overridden"
                    .into(),
            });
        }

        if !self.matrix.homeserver.is_empty() && self.matrix.user_id.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "matrix.user_id".into(),
                message: "a homeserver is configured but no user id".into(),
            });
        }

        if !self.voice.turn_url.is_empty() && self.voice.turn_secret.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "voice.turn_secret".into(),
                message: "TURN is configured without a shared secret".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let issues = Config::default().validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn turn_without_secret_is_an_error() {
        let mut config = Config::default();
        config.voice.turn_url = "turn:turn.example.org:3478".into();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "voice.turn_secret" && i.severity == ConfigSeverity::Error));
    }
}
