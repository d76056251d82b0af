use std::time::Duration;

/// Connection-manager tag the relay connection is protected under.
pub const RELAY_PROTECT_TAG: &str = "auction-relay";

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RelayManagerConfig {
    /// Period of the protected-and-connected check.
    pub health_check_interval: Duration,
    pub protect_tag: String,
}

impl Default for RelayManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            protect_tag: RELAY_PROTECT_TAG.to_string(),
        }
    }
}
