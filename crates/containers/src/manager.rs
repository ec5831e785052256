//! Scoped container creation and lifecycle, in front of the runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use wb_domain::config::ContainersConfig;
use wb_domain::types::TrustLevel;
use wb_domain::{Error, Result};

use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::ttl::{TrackedContainer, TtlStats, TtlTracker};

/// Label keys stamped onto every agent container for audit.
const LABEL_SESSION: &str = "wardbridge.session_id";
const LABEL_CREDENTIAL: &str = "wardbridge.credential_id";
const LABEL_TRUST: &str = "wardbridge.trust_tier";

pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    ttl: Arc<TtlTracker>,
    config: ContainersConfig,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ContainersConfig) -> Self {
        let ttl = Arc::new(TtlTracker::new(
            runtime.clone(),
            Duration::from_secs(config.idle_timeout_secs),
            Duration::from_secs(config.check_interval_secs),
            Duration::from_secs(config.stop_grace_secs),
        ));
        Self {
            runtime,
            ttl,
            config,
        }
    }

    /// The TTL tracker (heartbeats, stats, reaper control).
    pub fn ttl(&self) -> &Arc<TtlTracker> {
        &self.ttl
    }

    /// Begin background TTL reaping.
    pub fn start(&self) {
        self.ttl.start();
    }

    /// Cancel the reaper loop.
    pub fn stop(&self) {
        self.ttl.stop();
    }

    /// Create and start an agent container bound to a session and a
    /// credential. The image must be pinned to an allow-listed digest.
    pub async fn create_agent_container(
        &self,
        session_id: &str,
        credential_id: &str,
        trust_tier: TrustLevel,
        image: Option<&str>,
    ) -> Result<TrackedContainer> {
        let image = image.unwrap_or(&self.config.agent_image);
        self.check_image_policy(image)?;

        let mut labels = HashMap::new();
        labels.insert(LABEL_SESSION.to_string(), session_id.to_string());
        labels.insert(LABEL_CREDENTIAL.to_string(), credential_id.to_string());
        labels.insert(LABEL_TRUST.to_string(), trust_tier.to_string());

        let spec = ContainerSpec {
            name: format!(
                "wb-agent-{}",
                session_id.chars().take(12).collect::<String>()
            ),
            image: image.to_string(),
            labels: labels.clone(),
        };

        let container_id = self.runtime.create(&spec).await?;
        self.runtime.start(&container_id).await?;
        self.ttl.register(&container_id, session_id, labels)?;

        tracing::info!(
            container = %container_id,
            session = %session_id,
            credential = %credential_id,
            "agent container created"
        );
        self.ttl.get(&container_id)
    }

    /// Stop and remove a container, dropping it from tracking.
    pub async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.ttl.force_remove(container_id).await
    }

    pub fn list(&self) -> Vec<TrackedContainer> {
        self.ttl.list()
    }

    pub fn stats(&self) -> TtlStats {
        self.ttl.stats()
    }

    /// Creation is refused unless the image is pinned to a digest on
    /// the allow-list.
    fn check_image_policy(&self, image: &str) -> Result<()> {
        let digest = image.split_once('@').map(|(_, d)| d).ok_or_else(|| {
            Error::Denied {
                reason: format!("image '{image}' is not pinned to a digest"),
                required_actions: vec!["pin the agent image to an allow-listed digest".into()],
            }
        })?;

        if !self.config.allowed_digests.iter().any(|d| d == digest) {
            return Err(Error::Denied {
                reason: format!("image digest {digest} is not allow-listed"),
                required_actions: vec!["add the digest to containers.allowed_digests".into()],
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    const DIGEST: &str = "sha256:8c25cad27b2cbe1aab3640bb5713bbac9fd3d0e30f69d0d34e30bb0bc1b480a4";

    fn manager(runtime: Arc<MockRuntime>) -> ContainerManager {
        ContainerManager::new(
            runtime,
            ContainersConfig {
                allowed_digests: vec![DIGEST.to_string()],
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn create_requires_digest_pinned_image() {
        let mgr = manager(Arc::new(MockRuntime::new()));
        let err = mgr
            .create_agent_container("sess-1", "cred-1", TrustLevel::Medium, Some("agent:latest"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Denied { .. }));
    }

    #[tokio::test]
    async fn create_refuses_unlisted_digest() {
        let mgr = manager(Arc::new(MockRuntime::new()));
        let err = mgr
            .create_agent_container(
                "sess-1",
                "cred-1",
                TrustLevel::Medium,
                Some("agent@sha256:0000000000000000000000000000000000000000000000000000000000000000"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Denied { .. }));
    }

    #[tokio::test]
    async fn create_starts_and_tracks_with_labels() {
        let runtime = Arc::new(MockRuntime::new());
        let mgr = manager(runtime.clone());
        let image = format!("agent@{DIGEST}");

        let tracked = mgr
            .create_agent_container("sess-12345", "cred-1", TrustLevel::High, Some(&image))
            .await
            .unwrap();

        assert_eq!(tracked.labels[LABEL_CREDENTIAL], "cred-1");
        assert_eq!(tracked.labels[LABEL_TRUST], "high");
        assert!(runtime.calls().iter().any(|c| c.starts_with("create ")));
        assert!(runtime.calls().iter().any(|c| c.starts_with("start ")));
        assert_eq!(mgr.list().len(), 1);
    }

    #[tokio::test]
    async fn stop_removes_from_tracking() {
        let runtime = Arc::new(MockRuntime::new());
        let mgr = manager(runtime);
        let image = format!("agent@{DIGEST}");
        let tracked = mgr
            .create_agent_container("sess-1", "cred-1", TrustLevel::Medium, Some(&image))
            .await
            .unwrap();

        mgr.stop_container(&tracked.container_id).await.unwrap();
        assert_eq!(mgr.list().len(), 0);
    }
}
