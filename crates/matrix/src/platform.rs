//! Platform connector contract and registry.
//!
//! Concrete chat-platform wire protocols live outside the core; the
//! broker only speaks this trait. The loopback connector exists for
//! development and connectivity tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;

use wb_domain::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStatus {
    pub platform: String,
    pub connected: bool,
    pub detail: Option<String>,
}

#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Platform tag (`"slack"`, `"discord"`, …).
    fn platform(&self) -> &str;
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn status(&self) -> ConnectorStatus;
    /// Lightweight connectivity probe.
    async fn test(&self) -> Result<()>;
    fn capabilities(&self) -> Vec<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PlatformRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn PlatformConnector>>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, connector: Arc<dyn PlatformConnector>) {
        self.connectors
            .write()
            .insert(connector.platform().to_string(), connector);
    }

    pub fn get(&self, platform: &str) -> Result<Arc<dyn PlatformConnector>> {
        self.connectors
            .read()
            .get(platform)
            .cloned()
            .ok_or_else(|| Error::not_found("platform", platform))
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn statuses(&self) -> Vec<ConnectorStatus> {
        let connectors: Vec<Arc<dyn PlatformConnector>> =
            self.connectors.read().values().cloned().collect();
        let mut statuses = Vec::with_capacity(connectors.len());
        for connector in connectors {
            statuses.push(connector.status().await);
        }
        statuses.sort_by(|a, b| a.platform.cmp(&b.platform));
        statuses
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loopback connector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-process connector for development and `platform test` calls.
pub struct LoopbackConnector {
    connected: AtomicBool,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
        }
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformConnector for LoopbackConnector {
    fn platform(&self) -> &str {
        "loopback"
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            platform: "loopback".into(),
            connected: self.connected.load(Ordering::SeqCst),
            detail: None,
        }
    }

    async fn test(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::downstream("loopback", "not connected"))
        }
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["send".into(), "receive".into()]
    }
}
