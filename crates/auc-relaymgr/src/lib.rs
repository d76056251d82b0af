//! Relay connection manager.
//!
//! Keeps a host reachable through one relay peer: the connection to the
//! relay is protected from pruning, checked on a fixed interval and redialed
//! as soon as the host reports it dropped.

#![forbid(unsafe_code)]

pub mod config;
pub mod manager;

pub use config::{RelayManagerConfig, DEFAULT_HEALTH_CHECK_INTERVAL, RELAY_PROTECT_TAG};
pub use manager::{RelayError, RelayManager, RelayState};
