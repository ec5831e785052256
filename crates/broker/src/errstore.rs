//! Recent-error store.
//!
//! A bounded ring of structured errors the broker has returned, kept so
//! operators can query and resolve them over RPC without grepping logs.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use wb_domain::{Error, Result};

const CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    pub id: String,
    /// Three-letter category prefix (`REQ`, `AUT`, `RES`, `INT`, `DWN`).
    pub category: String,
    /// Stable structured code (`"RES-404"`).
    pub code: String,
    pub method: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub resolved: bool,
}

pub struct ErrorStore {
    errors: RwLock<VecDeque<RecordedError>>,
}

impl ErrorStore {
    pub fn new() -> Self {
        Self {
            errors: RwLock::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    pub fn record(&self, method: &str, category: &str, code: &str, message: &str) -> String {
        let entry = RecordedError {
            id: Uuid::new_v4().to_string(),
            category: category.to_string(),
            code: code.to_string(),
            method: method.to_string(),
            message: message.to_string(),
            occurred_at: Utc::now(),
            resolved: false,
        };
        let id = entry.id.clone();
        let mut errors = self.errors.write();
        if errors.len() == CAPACITY {
            errors.pop_front();
        }
        errors.push_back(entry);
        id
    }

    /// Newest first, optionally filtered by category, capped at `limit`.
    pub fn query(&self, limit: usize, category: Option<&str>) -> Vec<RecordedError> {
        self.errors
            .read()
            .iter()
            .rev()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn resolve(&self, id: &str) -> Result<RecordedError> {
        let mut errors = self.errors.write();
        let entry = errors
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::not_found("error", id))?;
        entry.resolved = true;
        Ok(entry.clone())
    }

    pub fn unresolved_count(&self) -> usize {
        self.errors.read().iter().filter(|e| !e.resolved).count()
    }
}

impl Default for ErrorStore {
    fn default() -> Self {
        Self::new()
    }
}
