//! Remote wallet daemon.
//!
//! Holds ed25519 wallet keys, serves the deal signing protocol to clients
//! that present the shared auth token, and optionally stays reachable
//! through a relay.

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod daemon;

pub use cli::Args;
pub use config::{ConfigError, DaemonConfig};
pub use daemon::Daemon;
