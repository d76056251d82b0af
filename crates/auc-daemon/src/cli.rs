use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Command-line flags. Every flag overrides the config file and environment.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "auc-wallet-daemon")]
#[command(about = "Remote wallet daemon - signs storage deal records for authenticated auction clients")]
pub struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to accept signing connections on
    #[arg(short, long)]
    pub listen_addr: Option<SocketAddr>,

    /// Relay to stay reachable through, e.g. /ip4/1.2.3.4/tcp/4001/p2p/<peer>
    #[arg(short, long)]
    pub relay_addr: Option<String>,

    /// Token clients must present
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Hex-encoded ed25519 secret key; repeat for several keys
    #[arg(long = "wallet-key")]
    pub wallet_keys: Vec<String>,

    /// Log level or filter directive
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}
