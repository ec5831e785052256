//! Matrix adapter and bridge management.
//!
//! A reqwest client for the client-server API, a long-lived sync loop
//! feeding a receive channel, and the bridge manager that maps external
//! platform events onto ghost users in Matrix rooms. Outgoing text goes
//! through the PHI/PII scrubber when enabled; every bridged hop is
//! audited.

mod adapter;
mod bridge;
mod client;
mod platform;

pub use adapter::{AdapterStatus, MatrixAdapter};
pub use bridge::{BridgeManager, RoomLink};
pub use client::{MatrixClient, RoomEvent, SyncBatch};
pub use platform::{ConnectorStatus, LoopbackConnector, PlatformConnector, PlatformRegistry};
