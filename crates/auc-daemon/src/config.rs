//! Daemon configuration.
//!
//! Sources, later ones winning: built-in defaults, the TOML file
//! (`--config` or `AUC_CONFIG`), `AUC_*` environment variables, then
//! command-line flags.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use auc_relaymgr::{RelayManagerConfig, DEFAULT_HEALTH_CHECK_INTERVAL, RELAY_PROTECT_TAG};
use auc_signer::SignerConfig;
use auc_transport::{PeerAddr, DEFAULT_MAX_MESSAGE_SIZE};
use auc_wallet::{generate_key, parse_secret_key, LocalWallet};
use ed25519_dalek::SigningKey;
use serde::Deserialize;
use thiserror::Error;

use crate::cli::Args;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub listen_addr: SocketAddr,
    /// Relay multiaddr; the relay manager only runs when this is set.
    pub relay_addr: Option<String>,
    pub auth_token: String,
    /// Hex-encoded ed25519 secret keys.
    pub wallet_keys: Vec<String>,
    /// Hex-encoded ed25519 secret for the host's peer identity. A fresh one
    /// is generated per run when absent.
    pub identity_key: Option<String>,
    pub stream_deadline_secs: u64,
    pub max_request_size: usize,
    pub max_response_size: usize,
    pub health_check_interval_secs: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4001)),
            relay_addr: None,
            auth_token: String::new(),
            wallet_keys: Vec::new(),
            identity_key: None,
            stream_deadline_secs: 60,
            max_request_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_response_size: DEFAULT_MAX_MESSAGE_SIZE,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL.as_secs(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("listen_addr", &self.listen_addr)
            .field("relay_addr", &self.relay_addr)
            .field("auth_token", &"<redacted>")
            .field("wallet_keys", &self.wallet_keys.len())
            .field("identity_key", &self.identity_key.as_ref().map(|_| "<redacted>"))
            .field("stream_deadline_secs", &self.stream_deadline_secs)
            .field("max_request_size", &self.max_request_size)
            .field("max_response_size", &self.max_response_size)
            .field("health_check_interval_secs", &self.health_check_interval_secs)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl DaemonConfig {
    /// Load from every source and validate.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        Self::load_with_env(args, |key| std::env::var(key).ok())
    }

    /// [`DaemonConfig::load`] with an explicit environment lookup.
    pub fn load_with_env(
        args: &Args,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = args
            .config
            .clone()
            .or_else(|| env("AUC_CONFIG").map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::from_toml_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(addr) = env("AUC_LISTEN_ADDR") {
            self.listen_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid AUC_LISTEN_ADDR: {}", e)))?;
        }
        if let Some(relay) = env("AUC_RELAY_ADDR") {
            self.relay_addr = Some(relay).filter(|r| !r.is_empty());
        }
        if let Some(token) = env("AUC_AUTH_TOKEN") {
            self.auth_token = token;
        }
        if let Some(keys) = env("AUC_WALLET_KEYS") {
            self.wallet_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(key) = env("AUC_IDENTITY_KEY") {
            self.identity_key = Some(key);
        }
        Ok(())
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(addr) = args.listen_addr {
            self.listen_addr = addr;
        }
        if let Some(relay) = &args.relay_addr {
            self.relay_addr = Some(relay.clone());
        }
        if let Some(token) = &args.auth_token {
            self.auth_token = token.clone();
        }
        if !args.wallet_keys.is_empty() {
            self.wallet_keys = args.wallet_keys.clone();
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if args.log_json {
            self.log_json = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_token.is_empty() {
            return Err(ConfigError::Invalid("auth_token must be set".to_string()));
        }
        if self.wallet_keys.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one wallet key is required".to_string(),
            ));
        }
        for (i, key) in self.wallet_keys.iter().enumerate() {
            parse_secret_key(key)
                .map_err(|e| ConfigError::Invalid(format!("wallet key #{}: {}", i + 1, e)))?;
        }
        if let Some(key) = &self.identity_key {
            parse_secret_key(key)
                .map_err(|e| ConfigError::Invalid(format!("identity_key: {}", e)))?;
        }
        self.relay_peer_addr()?;
        if self.stream_deadline_secs == 0 {
            return Err(ConfigError::Invalid("stream_deadline_secs must be > 0".to_string()));
        }
        if self.max_request_size == 0 || self.max_response_size == 0 {
            return Err(ConfigError::Invalid("message size bounds must be > 0".to_string()));
        }
        if self.health_check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "health_check_interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn relay_peer_addr(&self) -> Result<Option<PeerAddr>, ConfigError> {
        self.relay_addr
            .as_deref()
            .map(|s| {
                s.parse::<PeerAddr>()
                    .map_err(|e| ConfigError::Invalid(format!("relay_addr {}: {}", s, e)))
            })
            .transpose()
    }

    pub fn wallet(&self) -> Result<LocalWallet, ConfigError> {
        LocalWallet::from_hex_secrets(&self.wallet_keys)
            .map_err(|e| ConfigError::Invalid(format!("wallet: {}", e)))
    }

    pub fn identity(&self) -> Result<SigningKey, ConfigError> {
        match &self.identity_key {
            Some(key) => parse_secret_key(key)
                .map_err(|e| ConfigError::Invalid(format!("identity_key: {}", e))),
            None => Ok(generate_key()),
        }
    }

    pub fn signer_config(&self) -> SignerConfig {
        SignerConfig {
            stream_deadline: Duration::from_secs(self.stream_deadline_secs),
            max_request_size: self.max_request_size,
            max_response_size: self.max_response_size,
        }
    }

    pub fn relay_manager_config(&self) -> RelayManagerConfig {
        RelayManagerConfig {
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            protect_tag: RELAY_PROTECT_TAG.to_string(),
        }
    }
}
