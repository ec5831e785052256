//! Shared domain types for the wardbridge workspace: the common error type,
//! the configuration tree, and the small value types every crate speaks
//! (providers, trust levels, severities).

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
