//! The wardbridge broker binary: CLI, the JSON-RPC control socket, the
//! method dispatcher with policy middleware, and the supplementary
//! managers (voice sessions, recovery phrases, plugins, licensing, the
//! recent-error store).

pub mod cli;
pub mod dispatch;
pub mod errstore;
pub mod handlers;
pub mod license;
pub mod plugins;
pub mod recovery;
pub mod rpc;
pub mod server;
pub mod state;
pub mod voice;
