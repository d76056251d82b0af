//! Relay manager state machine and control loop.
//!
//! ```text
//! Initializing -> Connected <-> Unhealthy
//!       \             |            /
//!        +-------> Closed <-------+
//! ```
//!
//! All reconnects run on the control loop: disconnect notifications are
//! forwarded to it over a channel and the loop also wakes on the health
//! check interval. The reconnect routine holds a mutex for its whole run,
//! and every dial races the close signal.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use auc_transport::{Connectedness, Host, Notifiee, PeerAddr, PeerId, RelayedAddr, SubscriptionId, TransportError};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::RelayManagerConfig;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connecting to relay {relay}: {source}")]
    Connect {
        relay: PeerAddr,
        #[source]
        source: TransportError,
    },

    #[error("relay {0} is this host")]
    SelfRelay(PeerId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    Initializing,
    Connected,
    Unhealthy,
    Closed,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::Initializing => f.write_str("initializing"),
            RelayState::Connected => f.write_str("connected"),
            RelayState::Unhealthy => f.write_str("unhealthy"),
            RelayState::Closed => f.write_str("closed"),
        }
    }
}

struct Shared {
    host: Arc<dyn Host>,
    relay: PeerAddr,
    config: RelayManagerConfig,
    state: Mutex<RelayState>,
    reconnect_lock: tokio::sync::Mutex<()>,
    reconnect_attempts: AtomicU64,
}

impl Shared {
    fn state(&self) -> RelayState {
        *self.state.lock()
    }

    /// Move to `next` unless already closed.
    fn transition(&self, next: RelayState) -> RelayState {
        let mut state = self.state.lock();
        let prev = *state;
        if prev != RelayState::Closed {
            *state = next;
        }
        prev
    }

    fn is_healthy(&self) -> bool {
        self.host
            .conn_manager()
            .is_protected(&self.relay.peer, Some(&self.config.protect_tag))
            && self.host.connectedness(&self.relay.peer) == Connectedness::Connected
    }

    async fn connect_and_protect(&self) -> Result<(), TransportError> {
        self.host.connect(&self.relay).await?;
        self.host
            .conn_manager()
            .protect(&self.relay.peer, &self.config.protect_tag);
        Ok(())
    }

    fn mark_unhealthy(&self, reason: &str) {
        if self.transition(RelayState::Unhealthy) == RelayState::Connected {
            warn!(relay = %self.relay, reason, "relay connection unhealthy");
        }
    }

    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) {
        let _guard = self.reconnect_lock.lock().await;
        if self.state() == RelayState::Closed {
            return;
        }
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(relay = %self.relay, attempt, "reconnecting to relay");

        tokio::select! {
            _ = closed(shutdown) => {
                debug!(relay = %self.relay, "reconnect abandoned, manager closing");
            }
            res = self.connect_and_protect() => match res {
                Ok(()) => {
                    if self.transition(RelayState::Connected) != RelayState::Closed {
                        info!(relay = %self.relay, attempt, "relay connection restored");
                    }
                }
                Err(e) => {
                    warn!(relay = %self.relay, attempt, error = %e, "relay reconnect failed");
                }
            }
        }
    }
}

async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Forwards disconnects of the relay peer to the control loop.
struct RelayNotifiee {
    relay: PeerId,
    events: mpsc::UnboundedSender<()>,
}

impl Notifiee for RelayNotifiee {
    fn connected(&self, peer: &PeerId) {
        if *peer == self.relay {
            debug!(relay = %peer, "relay connected");
        }
    }

    fn disconnected(&self, peer: &PeerId) {
        if *peer == self.relay {
            let _ = self.events.send(());
        }
    }
}

async fn control_loop(
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    mut events: mpsc::UnboundedReceiver<()>,
) {
    let period = shared.config.health_check_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = closed(&mut shutdown) => break,
            Some(()) = events.recv() => {
                if shared.is_healthy() {
                    debug!(relay = %shared.relay, "stale disconnect event, relay still up");
                    continue;
                }
                shared.mark_unhealthy("disconnected");
                shared.reconnect(&mut shutdown).await;
            }
            _ = ticker.tick() => {
                if shared.is_healthy() {
                    debug!(relay = %shared.relay, "relay healthy");
                    continue;
                }
                shared.mark_unhealthy("health check failed");
                shared.reconnect(&mut shutdown).await;
            }
        }
    }
    debug!(relay = %shared.relay, "relay control loop exited");
}

/// Keeps a protected connection to one relay for its whole lifetime.
pub struct RelayManager {
    shared: Arc<Shared>,
    subscription: SubscriptionId,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: OnceCell<()>,
}

impl RelayManager {
    /// Connect to `relay`, protect the connection and start monitoring it.
    ///
    /// Fails if the first connect fails.
    pub async fn start(
        host: Arc<dyn Host>,
        relay: PeerAddr,
        config: RelayManagerConfig,
    ) -> Result<Self, RelayError> {
        if relay.peer == *host.id() {
            return Err(RelayError::SelfRelay(relay.peer));
        }

        let shared = Arc::new(Shared {
            host,
            relay,
            config,
            state: Mutex::new(RelayState::Initializing),
            reconnect_lock: tokio::sync::Mutex::new(()),
            reconnect_attempts: AtomicU64::new(0),
        });

        // Subscribe before dialing so a drop right after the first connect
        // is queued for the control loop.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscription = shared.host.notify(Arc::new(RelayNotifiee {
            relay: shared.relay.peer.clone(),
            events: events_tx,
        }));

        if let Err(source) = shared.connect_and_protect().await {
            shared.host.stop_notify(subscription);
            return Err(RelayError::Connect {
                relay: shared.relay.clone(),
                source,
            });
        }
        shared.transition(RelayState::Connected);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(control_loop(Arc::clone(&shared), shutdown_rx, events_rx));

        info!(
            relay = %shared.relay,
            relayed = %shared.relay.relayed(shared.host.id()),
            "relay manager started"
        );

        Ok(Self {
            shared,
            subscription,
            shutdown,
            task: Mutex::new(Some(task)),
            closed: OnceCell::new(),
        })
    }

    pub fn state(&self) -> RelayState {
        self.shared.state()
    }

    pub fn relay_addr(&self) -> &PeerAddr {
        &self.shared.relay
    }

    /// Address other peers can use to reach this host through the relay.
    pub fn relayed_addr(&self) -> RelayedAddr {
        self.shared.relay.relayed(self.shared.host.id())
    }

    /// Number of reconnects attempted since start.
    pub fn reconnect_attempts(&self) -> u64 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Stop monitoring and release the relay connection.
    ///
    /// Safe to call any number of times from any number of tasks; the
    /// shutdown runs once and every caller returns after it has finished.
    pub async fn close(&self) {
        self.closed
            .get_or_init(|| async {
                self.shared.transition(RelayState::Closed);
                self.shutdown.send_replace(true);

                let task = self.task.lock().take();
                if let Some(task) = task {
                    if let Err(e) = task.await {
                        warn!(error = %e, "relay control loop ended abnormally");
                    }
                }

                self.shared.host.stop_notify(self.subscription);
                self.shared
                    .host
                    .conn_manager()
                    .unprotect(&self.shared.relay.peer, &self.shared.config.protect_tag);
                info!(relay = %self.shared.relay, "relay manager closed");
            })
            .await;
    }
}

impl Drop for RelayManager {
    /// Best-effort release when the manager is dropped without `close`.
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if self.closed.initialized() {
            return;
        }
        self.shared.transition(RelayState::Closed);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.host.stop_notify(self.subscription);
        self.shared
            .host
            .conn_manager()
            .unprotect(&self.shared.relay.peer, &self.shared.config.protect_tag);
        debug!(relay = %self.shared.relay, "relay manager dropped without close");
    }
}
