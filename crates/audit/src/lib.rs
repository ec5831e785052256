//! Tamper-evident audit log.
//!
//! Every privileged operation in the broker produces exactly one entry.
//! Entries are chain-linked: each carries the SHA-256 of its predecessor's
//! hash concatenated with its own canonical bytes, so any insertion,
//! deletion, or mutation breaks the chain and is caught by an O(n) walk.

mod entry;
mod log;

pub use entry::{
    AuditActor, AuditEntry, AuditEvent, AuditResource, ComplianceFlags, GENESIS_HASH,
};
pub use log::{AuditLog, ChainStatus, ExportFormat};
