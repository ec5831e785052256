//! Per-container secret delivery socket.
//!
//! Wire format: one write of a 4-byte big-endian length followed by that
//! many bytes of UTF-8 JSON, then the bridge closes the connection and
//! unlinks the socket. A delivery either completes in full or the socket
//! is destroyed with no payload bytes sent.

use std::collections::HashMap;
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;

use wb_domain::config::InjectConfig;
use wb_domain::{Error, Result};

/// Environment-mode variable prefix (diagnostic fallback only).
const ENV_PREFIX: &str = "WB_SECRET_";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The JSON document streamed into the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretPayload {
    pub request_id: String,
    pub skill_id: String,
    pub variables: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Injector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Delivers secrets over short-lived per-container Unix sockets.
pub struct SecretInjector {
    socket_dir: PathBuf,
    accept_timeout: Duration,
    allow_env_fallback: bool,
    /// Container names with a live delivery in flight. At most one
    /// session per container name.
    active: Mutex<HashSet<String>>,
}

impl SecretInjector {
    pub fn new(config: &InjectConfig) -> Result<Self> {
        let socket_dir = PathBuf::from(&config.socket_dir);
        std::fs::create_dir_all(&socket_dir).map_err(Error::Io)?;
        std::fs::set_permissions(&socket_dir, std::fs::Permissions::from_mode(0o770))
            .map_err(Error::Io)?;

        Ok(Self {
            socket_dir,
            accept_timeout: Duration::from_secs(config.accept_timeout_secs),
            allow_env_fallback: config.allow_env_fallback,
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Path of the delivery socket for a container.
    pub fn socket_path(&self, container: &str) -> PathBuf {
        self.socket_dir.join(format!("{container}.sock"))
    }

    /// Deliver `payload` to the named container's socket. Waits for
    /// exactly one connection; on timeout the socket is torn down and
    /// the delivery fails. The socket file is gone when this returns,
    /// success or not.
    pub async fn deliver(&self, container: &str, payload: &SecretPayload) -> Result<()> {
        {
            let mut active = self.active.lock();
            if !active.insert(container.to_string()) {
                return Err(Error::Conflict(format!(
                    "a delivery for container '{container}' is already in flight"
                )));
            }
        }

        let path = self.socket_path(container);
        let result = self.deliver_inner(&path, payload).await;

        // Teardown happens on every path, including errors and timeout.
        let _ = std::fs::remove_file(&path);
        self.active.lock().remove(container);

        match &result {
            Ok(()) => tracing::info!(container, "secret delivered over socket"),
            Err(e) => tracing::warn!(container, error = %e, "secret delivery failed"),
        }
        result
    }

    async fn deliver_inner(&self, path: &Path, payload: &SecretPayload) -> Result<()> {
        // A stale socket from a crashed delivery would make bind fail.
        let _ = std::fs::remove_file(path);

        let listener = UnixListener::bind(path).map_err(Error::Io)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
            .map_err(Error::Io)?;

        let (mut stream, _addr) =
            match tokio::time::timeout(self.accept_timeout, listener.accept()).await {
                Ok(accepted) => accepted.map_err(Error::Io)?,
                Err(_) => {
                    return Err(Error::Timeout(format!(
                        "no connection on secret socket within {:?}",
                        self.accept_timeout
                    )));
                }
            };

        let body = serde_json::to_vec(payload)?;
        let len = (body.len() as u32).to_be_bytes();

        stream.write_all(&len).await.map_err(Error::Io)?;
        stream.write_all(&body).await.map_err(Error::Io)?;
        stream.flush().await.map_err(Error::Io)?;
        stream.shutdown().await.map_err(Error::Io)?;
        Ok(())
    }

    /// Diagnostic fallback: render the payload as environment variables
    /// with a fixed prefix. Weaker than socket delivery because inspect
    /// tooling exposes container environments; gated by configuration
    /// and logged on every use.
    pub fn deliver_env(&self, container: &str, payload: &SecretPayload) -> Result<Vec<(String, String)>> {
        if !self.allow_env_fallback {
            return Err(Error::Denied {
                reason: "environment-variable injection is disabled".into(),
                required_actions: vec!["enable inject.allow_env_fallback".into()],
            });
        }
        tracing::warn!(
            container,
            "delivering secret via environment variables (weaker than socket delivery)"
        );
        let mut vars: Vec<(String, String)> = payload
            .variables
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{}", k.to_uppercase()), v.clone()))
            .collect();
        vars.sort();
        Ok(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SecretPayload {
        let mut variables = HashMap::new();
        variables.insert("api_key".to_string(), "sk-test-123".to_string());
        SecretPayload {
            request_id: "req-1".into(),
            skill_id: "llm".into(),
            variables,
            expires_at: Utc::now() + chrono::Duration::minutes(5),
        }
    }

    #[test]
    fn env_fallback_is_denied_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let injector = SecretInjector::new(&InjectConfig {
            socket_dir: dir.path().join("secrets").display().to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(injector.deliver_env("c1", &payload()).is_err());
    }

    #[test]
    fn env_fallback_prefixes_variables() {
        let dir = tempfile::tempdir().unwrap();
        let injector = SecretInjector::new(&InjectConfig {
            socket_dir: dir.path().join("secrets").display().to_string(),
            allow_env_fallback: true,
            ..Default::default()
        })
        .unwrap();
        let vars = injector.deliver_env("c1", &payload()).unwrap();
        assert_eq!(vars, vec![("WB_SECRET_API_KEY".to_string(), "sk-test-123".to_string())]);
    }
}
