//! Bridge manager: room links and ghost users.
//!
//! Maps `(matrix room, platform, platform channel)` triples. For each
//! inbound external event the manager materializes a ghost user id,
//! joins it to the room when it has not been seen before, and sends the
//! scrubbed text on its behalf. Every hop is audited.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use wb_audit::{AuditActor, AuditEvent, AuditLog, AuditResource};
use wb_domain::types::Severity;
use wb_domain::{Error, Result};
use wb_scrubber::Scrubber;

use crate::client::MatrixClient;

/// One bridged room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomLink {
    pub matrix_room: String,
    pub platform: String,
    pub platform_channel: String,
}

pub struct BridgeManager {
    client: Arc<MatrixClient>,
    scrubber: Option<Arc<Scrubber>>,
    audit: Arc<AuditLog>,
    server_name: String,
    links: RwLock<Vec<RoomLink>>,
    /// Ghost users already joined to their rooms.
    joined_ghosts: RwLock<HashSet<(String, String)>>,
}

impl BridgeManager {
    pub fn new(
        client: Arc<MatrixClient>,
        scrubber: Option<Arc<Scrubber>>,
        audit: Arc<AuditLog>,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            scrubber,
            audit,
            server_name: server_name.into(),
            links: RwLock::new(Vec::new()),
            joined_ghosts: RwLock::new(HashSet::new()),
        }
    }

    // ── link table ─────────────────────────────────────────────────

    pub fn link(&self, link: RoomLink) -> Result<()> {
        let mut links = self.links.write();
        if links.iter().any(|l| {
            l.platform == link.platform && l.platform_channel == link.platform_channel
        }) {
            return Err(Error::Conflict(format!(
                "{}/{} is already bridged",
                link.platform, link.platform_channel
            )));
        }
        tracing::info!(
            room = %link.matrix_room,
            platform = %link.platform,
            channel = %link.platform_channel,
            "room linked"
        );
        links.push(link);
        Ok(())
    }

    pub fn unlink(&self, platform: &str, platform_channel: &str) -> Result<()> {
        let mut links = self.links.write();
        let before = links.len();
        links.retain(|l| !(l.platform == platform && l.platform_channel == platform_channel));
        if links.len() == before {
            return Err(Error::not_found(
                "room link",
                format!("{platform}/{platform_channel}"),
            ));
        }
        Ok(())
    }

    pub fn list_links(&self) -> Vec<RoomLink> {
        self.links.read().clone()
    }

    /// The ghost user id for an external identity.
    pub fn ghost_user_id(&self, platform: &str, external_id: &str) -> String {
        // Matrix localparts are lowercase; squash anything unexpected.
        let sanitized: String = external_id
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect();
        format!("@{platform}_{sanitized}:{}", self.server_name)
    }

    // ── inbound relay ──────────────────────────────────────────────

    /// Relay one inbound platform event into its linked Matrix room.
    /// Returns the Matrix event id.
    pub async fn relay_inbound(
        &self,
        platform: &str,
        platform_channel: &str,
        external_user_id: &str,
        text: &str,
    ) -> Result<String> {
        let room = {
            let links = self.links.read();
            links
                .iter()
                .find(|l| l.platform == platform && l.platform_channel == platform_channel)
                .map(|l| l.matrix_room.clone())
                .ok_or_else(|| {
                    Error::not_found("room link", format!("{platform}/{platform_channel}"))
                })?
        };

        let ghost = self.ghost_user_id(platform, external_user_id);

        // First appearance of this ghost in this room: join it.
        let needs_join = {
            let joined = self.joined_ghosts.read();
            !joined.contains(&(ghost.clone(), room.clone()))
        };
        if needs_join {
            self.client.join_room(&room, Some(&ghost)).await?;
            self.joined_ghosts
                .write()
                .insert((ghost.clone(), room.clone()));
            tracing::debug!(ghost = %ghost, room = %room, "ghost user joined room");
        }

        let outgoing = match &self.scrubber {
            Some(scrubber) => scrubber.scrub_message(text, external_user_id, &room)?.text,
            None => text.to_string(),
        };

        let event_id = self
            .client
            .send_message(&room, &outgoing, Some(&ghost))
            .await?;

        self.audit.append(
            AuditEvent::new(
                "bridge",
                AuditActor::user(&ghost, None),
                "relay_inbound",
                AuditResource::new("room", &room),
            )
            .detail(serde_json::json!({
                "platform": platform,
                "channel": platform_channel,
                "event_id": event_id,
            }))
            .compliance("access", Severity::Low),
        )?;

        Ok(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wb_domain::config::MatrixConfig;

    fn manager(dir: &std::path::Path) -> BridgeManager {
        let client = Arc::new(
            MatrixClient::new(&MatrixConfig {
                homeserver: "https://matrix.example.org".into(),
                user_id: "@bridge:example.org".into(),
                ..Default::default()
            })
            .unwrap(),
        );
        let audit = Arc::new(
            AuditLog::open(&wb_domain::config::AuditConfig {
                path: dir.join("audit.jsonl").display().to_string(),
                fsync_critical: false,
                ..Default::default()
            })
            .unwrap(),
        );
        BridgeManager::new(client, None, audit, "example.org")
    }

    #[test]
    fn ghost_ids_are_sanitized_matrix_localparts() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        assert_eq!(
            mgr.ghost_user_id("slack", "U12 34|bob"),
            "@slack_u12_34_bob:example.org"
        );
    }

    #[test]
    fn duplicate_links_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let link = RoomLink {
            matrix_room: "!room:example.org".into(),
            platform: "slack".into(),
            platform_channel: "C01".into(),
        };
        mgr.link(link.clone()).unwrap();
        assert!(mgr.link(link).is_err());
        assert_eq!(mgr.list_links().len(), 1);
    }

    #[test]
    fn unlink_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        assert!(mgr.unlink("slack", "C404").is_err());
    }
}
