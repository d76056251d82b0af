//! In-process hosts for tests.
//!
//! A [`MemoryNetwork`] routes streams between [`MemoryHost`]s over tokio
//! duplex pipes. Connections are simulated: `connect` records a link on both
//! ends and fires notifications, and [`MemoryNetwork::disconnect`] tears a
//! link down the way a dropped TCP connection would.

use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing::debug;

use crate::connmgr::{NotifierSet, ProtectionTable};
use crate::peer::{PeerAddr, PeerId};
use crate::traits::{
    BoxStream, ConnManager, Connectedness, Host, Notifiee, Stream, StreamHandler, SubscriptionId,
    TransportError,
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Stream half backed by a duplex pipe.
pub struct MemoryStream {
    inner: DuplexStream,
    remote: PeerId,
    protocol: String,
}

impl MemoryStream {
    /// Build a connected pair of streams between `a` and `b`.
    pub fn pair(a: &PeerId, b: &PeerId, protocol: &str) -> (MemoryStream, MemoryStream) {
        let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
        (
            MemoryStream {
                inner: left,
                remote: b.clone(),
                protocol: protocol.to_string(),
            },
            MemoryStream {
                inner: right,
                remote: a.clone(),
                protocol: protocol.to_string(),
            },
        )
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Stream for MemoryStream {
    fn remote_peer(&self) -> &PeerId {
        &self.remote
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }
}

/// Registry of in-process hosts.
#[derive(Default)]
pub struct MemoryNetwork {
    hosts: DashMap<PeerId, Weak<MemoryHost>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a host with the given id and attach it to the network.
    pub fn add_host(self: &Arc<Self>, id: PeerId) -> Arc<MemoryHost> {
        let host = Arc::new(MemoryHost {
            id: id.clone(),
            network: Arc::clone(self),
            handlers: DashMap::new(),
            links: Mutex::new(HashSet::new()),
            protection: ProtectionTable::new(),
            notifiers: NotifierSet::new(),
            dial_attempts: DashMap::new(),
            fail_dials: AtomicBool::new(false),
            dial_delay: Mutex::new(Duration::ZERO),
        });
        self.hosts.insert(id, Arc::downgrade(&host));
        host
    }

    fn lookup(&self, peer: &PeerId) -> Option<Arc<MemoryHost>> {
        self.hosts.get(peer).and_then(|h| h.upgrade())
    }

    /// Tear down the link between `a` and `b`, notifying both ends.
    pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
        for (local, remote) in [(a, b), (b, a)] {
            if let Some(host) = self.lookup(local) {
                if host.links.lock().remove(remote) {
                    debug!(local = %local, remote = %remote, "memory link dropped");
                    host.notifiers.emit_disconnected(remote);
                }
            }
        }
    }
}

/// A host living inside a [`MemoryNetwork`].
pub struct MemoryHost {
    id: PeerId,
    network: Arc<MemoryNetwork>,
    handlers: DashMap<String, Arc<dyn StreamHandler>>,
    links: Mutex<HashSet<PeerId>>,
    protection: ProtectionTable,
    notifiers: NotifierSet,
    dial_attempts: DashMap<PeerId, usize>,
    fail_dials: AtomicBool,
    dial_delay: Mutex<Duration>,
}

impl MemoryHost {
    /// Number of `connect` calls made towards `peer`.
    pub fn dial_attempts(&self, peer: &PeerId) -> usize {
        self.dial_attempts.get(peer).map(|n| *n).unwrap_or(0)
    }

    /// Make every subsequent `connect` fail.
    pub fn set_dial_failure(&self, fail: bool) {
        self.fail_dials.store(fail, Ordering::SeqCst);
    }

    /// Delay every subsequent `connect` by `delay`.
    pub fn set_dial_delay(&self, delay: Duration) {
        *self.dial_delay.lock() = delay;
    }

    /// Drop the link to `peer` as if the connection died.
    pub fn drop_link(&self, peer: &PeerId) {
        self.network.disconnect(&self.id, peer);
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifiers.len()
    }

    pub fn has_handler(&self, protocol: &str) -> bool {
        self.handlers.contains_key(protocol)
    }

    fn link(&self, peer: &PeerId) -> bool {
        self.links.lock().insert(peer.clone())
    }
}

#[async_trait]
impl Host for MemoryHost {
    fn id(&self) -> &PeerId {
        &self.id
    }

    fn set_stream_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers.insert(protocol.to_string(), handler);
    }

    fn remove_stream_handler(&self, protocol: &str) {
        self.handlers.remove(protocol);
    }

    async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<BoxStream, TransportError> {
        let remote = self
            .network
            .lookup(peer)
            .ok_or_else(|| TransportError::NoRoute(peer.clone()))?;
        let handler = remote
            .handlers
            .get(protocol)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| TransportError::ProtocolNotSupported(protocol.to_string()))?;

        let (local, inbound) = MemoryStream::pair(&self.id, peer, protocol);
        tokio::spawn(async move {
            handler.handle(Box::new(inbound)).await;
        });
        Ok(Box::new(local))
    }

    async fn connect(&self, addr: &PeerAddr) -> Result<(), TransportError> {
        *self.dial_attempts.entry(addr.peer.clone()).or_insert(0) += 1;

        let delay = *self.dial_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_dials.load(Ordering::SeqCst) {
            return Err(TransportError::Dial("simulated dial failure".into()));
        }

        let remote = self
            .network
            .lookup(&addr.peer)
            .ok_or_else(|| TransportError::NoRoute(addr.peer.clone()))?;

        if self.link(&addr.peer) {
            self.notifiers.emit_connected(&addr.peer);
        }
        if remote.link(&self.id) {
            remote.notifiers.emit_connected(&self.id);
        }
        Ok(())
    }

    fn connectedness(&self, peer: &PeerId) -> Connectedness {
        if self.links.lock().contains(peer) {
            Connectedness::Connected
        } else {
            Connectedness::NotConnected
        }
    }

    fn conn_manager(&self) -> &dyn ConnManager {
        &self.protection
    }

    fn notify(&self, notifiee: Arc<dyn Notifiee>) -> SubscriptionId {
        self.notifiers.subscribe(notifiee)
    }

    fn stop_notify(&self, id: SubscriptionId) {
        self.notifiers.unsubscribe(id);
    }
}
