//! Plugin lifecycle management.
//!
//! Plugins are opaque handles with a metadata record and the lifecycle
//! discover → load → initialize → start → stop → unload. The core never
//! shares memory with them beyond this interface; transitions outside
//! the state machine are conflicts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use wb_domain::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Discovered,
    Loaded,
    Initialized,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginHandle {
    pub meta: PluginMeta,
    pub state: PluginState,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginHealth {
    pub id: String,
    pub state: PluginState,
    pub healthy: bool,
}

pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, PluginHandle>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Register discovered plugin metadata. Already-known ids keep
    /// their current state.
    pub fn discover(&self, available: Vec<PluginMeta>) -> Vec<PluginHandle> {
        let mut plugins = self.plugins.write();
        for meta in available {
            plugins.entry(meta.id.clone()).or_insert(PluginHandle {
                meta,
                state: PluginState::Discovered,
                loaded_at: None,
                last_transition: Utc::now(),
            });
        }
        let mut list: Vec<PluginHandle> = plugins.values().cloned().collect();
        list.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        list
    }

    pub fn load(&self, id: &str) -> Result<PluginHandle> {
        let mut plugins = self.plugins.write();
        let handle = plugins
            .get_mut(id)
            .ok_or_else(|| Error::not_found("plugin", id))?;
        if handle.state != PluginState::Discovered {
            return Err(Error::Conflict(format!(
                "plugin '{id}' is {:?}; cannot load",
                handle.state
            )));
        }
        handle.state = PluginState::Loaded;
        handle.loaded_at = Some(Utc::now());
        handle.last_transition = Utc::now();
        Ok(handle.clone())
    }

    pub fn initialize(&self, id: &str) -> Result<PluginHandle> {
        self.transition(id, PluginState::Loaded, PluginState::Initialized)
    }

    pub fn start(&self, id: &str) -> Result<PluginHandle> {
        self.transition(id, PluginState::Initialized, PluginState::Running)
    }

    pub fn stop(&self, id: &str) -> Result<PluginHandle> {
        self.transition(id, PluginState::Running, PluginState::Stopped)
    }

    /// Unload removes the handle entirely. Running plugins must be
    /// stopped first.
    pub fn unload(&self, id: &str) -> Result<PluginMeta> {
        let mut plugins = self.plugins.write();
        let handle = plugins
            .remove(id)
            .ok_or_else(|| Error::not_found("plugin", id))?;
        if handle.state == PluginState::Running {
            let id = handle.meta.id.clone();
            plugins.insert(id.clone(), handle);
            return Err(Error::Conflict(format!(
                "plugin '{id}' is running; stop it before unloading"
            )));
        }
        tracing::info!(plugin = %id, "plugin unloaded");
        Ok(handle.meta)
    }

    pub fn list(&self) -> Vec<PluginHandle> {
        let mut list: Vec<PluginHandle> = self.plugins.read().values().cloned().collect();
        list.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        list
    }

    pub fn status(&self, id: &str) -> Result<PluginHandle> {
        self.plugins
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("plugin", id))
    }

    pub fn health(&self) -> Vec<PluginHealth> {
        let mut health: Vec<PluginHealth> = self
            .plugins
            .read()
            .values()
            .map(|h| PluginHealth {
                id: h.meta.id.clone(),
                state: h.state,
                healthy: h.state != PluginState::Stopped,
            })
            .collect();
        health.sort_by(|a, b| a.id.cmp(&b.id));
        health
    }

    fn transition(
        &self,
        id: &str,
        expected: PluginState,
        next: PluginState,
    ) -> Result<PluginHandle> {
        let mut plugins = self.plugins.write();
        let handle = plugins
            .get_mut(id)
            .ok_or_else(|| Error::not_found("plugin", id))?;
        if handle.state != expected {
            return Err(Error::Conflict(format!(
                "plugin '{id}' is {:?}; cannot move to {:?}",
                handle.state, next
            )));
        }
        handle.state = next;
        handle.last_transition = Utc::now();
        tracing::info!(plugin = %id, state = ?next, "plugin transition");
        Ok(handle.clone())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> PluginMeta {
        PluginMeta {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            capabilities: vec!["bridge".into()],
        }
    }

    #[test]
    fn full_lifecycle_walks_the_state_machine() {
        let registry = PluginRegistry::new();
        registry.discover(vec![meta("telegram")]);

        assert_eq!(registry.load("telegram").unwrap().state, PluginState::Loaded);
        assert_eq!(
            registry.initialize("telegram").unwrap().state,
            PluginState::Initialized
        );
        assert_eq!(registry.start("telegram").unwrap().state, PluginState::Running);
        assert_eq!(registry.stop("telegram").unwrap().state, PluginState::Stopped);
        registry.unload("telegram").unwrap();
        assert!(registry.status("telegram").is_err());
    }

    #[test]
    fn skipping_states_is_a_conflict() {
        let registry = PluginRegistry::new();
        registry.discover(vec![meta("telegram")]);
        assert!(registry.start("telegram").is_err());
    }

    #[test]
    fn running_plugin_cannot_be_unloaded() {
        let registry = PluginRegistry::new();
        registry.discover(vec![meta("telegram")]);
        registry.load("telegram").unwrap();
        registry.initialize("telegram").unwrap();
        registry.start("telegram").unwrap();
        assert!(registry.unload("telegram").is_err());
    }

    #[test]
    fn rediscovery_preserves_state() {
        let registry = PluginRegistry::new();
        registry.discover(vec![meta("telegram")]);
        registry.load("telegram").unwrap();
        registry.discover(vec![meta("telegram"), meta("signal")]);
        assert_eq!(
            registry.status("telegram").unwrap().state,
            PluginState::Loaded
        );
        assert_eq!(registry.list().len(), 2);
    }
}
