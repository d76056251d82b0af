//! Wires a TCP host, the local wallet, the signer service and the optional
//! relay manager into one running daemon.

use std::sync::Arc;

use anyhow::Context;
use auc_relaymgr::{RelayManager, RelayState};
use auc_signer::{SignerService, SignerStatsSnapshot};
use auc_transport::tcp::TcpHost;
use auc_transport::{Host, PeerAddr, PeerId, RelayedAddr};
use tracing::info;

use crate::config::DaemonConfig;

pub struct Daemon {
    host: TcpHost,
    service: SignerService,
    relay: Option<RelayManager>,
    addresses: Vec<String>,
}

impl Daemon {
    /// Bind the listener, register the signing protocol and, when a relay is
    /// configured, connect to it.
    pub async fn start(config: DaemonConfig) -> anyhow::Result<Self> {
        let wallet = config.wallet()?;
        let addresses = wallet.addresses();
        let identity = config.identity()?;
        let peer_id = PeerId::from_public_key(identity.verifying_key().as_bytes());
        let relay_addr = config.relay_peer_addr()?;

        let host = TcpHost::listen(peer_id, config.listen_addr)
            .await
            .with_context(|| format!("listening on {}", config.listen_addr))?;
        let shared_host: Arc<dyn Host> = Arc::new(host.clone());

        let service = match SignerService::start(
            Arc::clone(&shared_host),
            config.auth_token.clone(),
            Arc::new(wallet),
            config.signer_config(),
        ) {
            Ok(service) => service,
            Err(e) => {
                host.close();
                return Err(e).context("starting signer service");
            }
        };

        let relay = match relay_addr {
            Some(addr) => {
                match RelayManager::start(shared_host, addr, config.relay_manager_config()).await {
                    Ok(mgr) => {
                        info!(relayed = %mgr.relayed_addr(), "reachable through relay");
                        Some(mgr)
                    }
                    Err(e) => {
                        service.stop();
                        host.close();
                        return Err(e).context("starting relay manager");
                    }
                }
            }
            None => None,
        };

        info!(
            peer = %host.peer_addr(),
            wallet_addresses = ?addresses,
            "wallet daemon running"
        );

        Ok(Self {
            host,
            service,
            relay,
            addresses,
        })
    }

    /// Directly dialable address of this daemon.
    pub fn peer_addr(&self) -> PeerAddr {
        self.host.peer_addr()
    }

    pub fn peer_id(&self) -> &PeerId {
        self.host.id()
    }

    pub fn wallet_addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Relay circuit address, when a relay is configured.
    pub fn relayed_addr(&self) -> Option<RelayedAddr> {
        self.relay.as_ref().map(RelayManager::relayed_addr)
    }

    pub fn relay_state(&self) -> Option<RelayState> {
        self.relay.as_ref().map(RelayManager::state)
    }

    pub fn stats(&self) -> SignerStatsSnapshot {
        self.service.stats()
    }

    pub async fn shutdown(self) {
        self.service.stop();
        if let Some(relay) = &self.relay {
            relay.close().await;
        }
        self.host.close();

        let stats = self.service.stats();
        info!(
            received = stats.received,
            signed = stats.signed,
            rejected = stats.rejected,
            aborted = stats.aborted,
            "wallet daemon stopped"
        );
    }
}
