use anyhow::Result;
use auc_daemon::{Args, Daemon, DaemonConfig};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(config: &DaemonConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::load(&args)?;
    init_tracing(&config);

    info!(config = ?config, "starting auc-wallet-daemon");
    let daemon = Daemon::start(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    daemon.shutdown().await;
    Ok(())
}
