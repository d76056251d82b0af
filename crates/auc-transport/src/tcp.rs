//! Plain TCP host.
//!
//! Every connection starts with a framed `Hello` from the dialer and a
//! `HelloAck` from the listener. A `Link` hello opens a long-lived connection
//! that only exists to track connectedness; a `Stream` hello turns the socket
//! into one protocol stream handed to the registered handler.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::connmgr::{NotifierSet, ProtectionTable};
use crate::framing::FrameCodec;
use crate::peer::{PeerAddr, PeerId};
use crate::traits::{
    BoxStream, ConnManager, Connectedness, Host, Notifiee, Stream, StreamHandler, SubscriptionId,
    TransportError,
};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HELLO_SIZE: usize = 4096;
const PROTOCOL_NOT_SUPPORTED: &str = "protocol not supported";

mod handshake {
    use prost::Message;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum HelloKind {
        Link = 0,
        Stream = 1,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Hello {
        #[prost(string, tag = "1")]
        pub peer_id: String,
        #[prost(enumeration = "HelloKind", tag = "2")]
        pub kind: i32,
        #[prost(string, tag = "3")]
        pub protocol: String,
        /// Port the dialer accepts connections on, 0 if none.
        #[prost(uint32, tag = "4")]
        pub listen_port: u32,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct HelloAck {
        #[prost(string, tag = "1")]
        pub peer_id: String,
        #[prost(string, tag = "2")]
        pub error: String,
    }
}

use handshake::{Hello, HelloAck, HelloKind};

fn hello_codec() -> FrameCodec {
    FrameCodec::new(MAX_HELLO_SIZE)
}

/// A protocol stream over its own TCP connection.
pub struct TcpPeerStream {
    inner: TcpStream,
    remote: PeerId,
    protocol: String,
}

impl AsyncRead for TcpPeerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpPeerStream {
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

impl Stream for TcpPeerStream {
    fn remote_peer(&self) -> &PeerId {
        &self.remote
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }
}

struct Inner {
    id: PeerId,
    local_addr: SocketAddr,
    handlers: DashMap<String, Arc<dyn StreamHandler>>,
    /// Last known dialable address per peer.
    peers: DashMap<PeerId, SocketAddr>,
    /// Live links, keyed by peer, valued by link generation.
    links: DashMap<PeerId, u64>,
    next_link: AtomicU64,
    protection: ProtectionTable,
    notifiers: NotifierSet,
    shutdown: watch::Sender<bool>,
}

/// TCP implementation of [`Host`].
#[derive(Clone)]
pub struct TcpHost {
    inner: Arc<Inner>,
}

impl TcpHost {
    /// Bind `listen_addr` and start accepting connections.
    pub async fn listen(id: PeerId, listen_addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            id,
            local_addr,
            handlers: DashMap::new(),
            peers: DashMap::new(),
            links: DashMap::new(),
            next_link: AtomicU64::new(0),
            protection: ProtectionTable::new(),
            notifiers: NotifierSet::new(),
            shutdown,
        });

        info!(peer = %inner.id, addr = %local_addr, "TCP host listening");
        tokio::spawn(accept_loop(Arc::clone(&inner), listener, shutdown_rx));
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// This host's own dialable address.
    pub fn peer_addr(&self) -> PeerAddr {
        PeerAddr::new(self.inner.local_addr, self.inner.id.clone())
    }

    /// Remember where `addr.peer` can be dialed without connecting to it.
    pub fn add_peer_addr(&self, addr: SocketAddr, peer: PeerId) {
        self.inner.peers.insert(peer, addr);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Stop accepting connections and drop every link.
    pub fn close(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        self.inner.handlers.clear();
        info!(peer = %self.inner.id, "TCP host closed");
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            res = listener.accept() => match res {
                Ok((sock, remote)) => {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        if let Err(e) = inner.accept(sock, remote).await {
                            debug!(remote = %remote, error = %e, "inbound connection rejected");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
    debug!("accept loop exited");
}

async fn watch_link(
    inner: Arc<Inner>,
    peer: PeerId,
    generation: u64,
    mut sock: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; 64];
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            res = sock.read(&mut buf) => match res {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
    inner.drop_link(&peer, generation);
}

impl Inner {
    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn accept(self: Arc<Self>, mut sock: TcpStream, remote: SocketAddr) -> Result<(), TransportError> {
        let codec = hello_codec();
        let hello: Hello = timeout(HANDSHAKE_TIMEOUT, codec.read(&mut sock))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let peer =
            PeerId::new(hello.peer_id.clone()).map_err(|e| TransportError::Handshake(e.to_string()))?;

        match u16::try_from(hello.listen_port) {
            Ok(port) if port != 0 => {
                self.peers.insert(peer.clone(), SocketAddr::new(remote.ip(), port));
            }
            _ => {}
        }

        match hello.kind() {
            HelloKind::Link => {
                self.ack(&mut sock, "").await?;
                self.register_link(peer, sock);
            }
            HelloKind::Stream => {
                let handler = self
                    .handlers
                    .get(&hello.protocol)
                    .map(|h| Arc::clone(h.value()));
                let Some(handler) = handler else {
                    self.ack(&mut sock, PROTOCOL_NOT_SUPPORTED).await?;
                    return Err(TransportError::ProtocolNotSupported(hello.protocol));
                };
                self.ack(&mut sock, "").await?;
                debug!(peer = %peer, protocol = %hello.protocol, "inbound stream");
                handler
                    .handle(Box::new(TcpPeerStream {
                        inner: sock,
                        remote: peer,
                        protocol: hello.protocol,
                    }))
                    .await;
            }
        }
        Ok(())
    }

    async fn ack(&self, sock: &mut TcpStream, error: &str) -> Result<(), TransportError> {
        let ack = HelloAck {
            peer_id: self.id.to_string(),
            error: error.to_string(),
        };
        hello_codec().write(sock, &ack).await?;
        Ok(())
    }

    async fn dial(
        &self,
        peer: &PeerId,
        target: SocketAddr,
        kind: HelloKind,
        protocol: &str,
    ) -> Result<TcpStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut sock = timeout(DIAL_TIMEOUT, TcpStream::connect(target))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Dial(format!("{}: {}", target, e)))?;

        let mut hello = Hello {
            peer_id: self.id.to_string(),
            kind: 0,
            protocol: protocol.to_string(),
            listen_port: u32::from(self.local_addr.port()),
        };
        hello.set_kind(kind);

        let codec = hello_codec();
        codec.write(&mut sock, &hello).await?;
        let ack: HelloAck = timeout(HANDSHAKE_TIMEOUT, codec.read(&mut sock))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if ack.peer_id != peer.as_str() {
            return Err(TransportError::Handshake(format!(
                "expected peer {}, got {}",
                peer, ack.peer_id
            )));
        }
        match ack.error.as_str() {
            "" => Ok(sock),
            PROTOCOL_NOT_SUPPORTED => Err(TransportError::ProtocolNotSupported(protocol.to_string())),
            other => Err(TransportError::Handshake(other.to_string())),
        }
    }

    fn register_link(self: &Arc<Self>, peer: PeerId, sock: TcpStream) {
        let generation = self.next_link.fetch_add(1, Ordering::Relaxed);
        let fresh = self.links.insert(peer.clone(), generation).is_none();
        if fresh {
            debug!(peer = %peer, "link up");
            self.notifiers.emit_connected(&peer);
        }
        tokio::spawn(watch_link(
            Arc::clone(self),
            peer,
            generation,
            sock,
            self.shutdown.subscribe(),
        ));
    }

    fn drop_link(&self, peer: &PeerId, generation: u64) {
        if self
            .links
            .remove_if(peer, |_, g| *g == generation)
            .is_some()
        {
            debug!(peer = %peer, "link down");
            self.notifiers.emit_disconnected(peer);
        }
    }
}

#[async_trait]
impl Host for TcpHost {
    fn id(&self) -> &PeerId {
        &self.inner.id
    }

    fn set_stream_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.inner.handlers.insert(protocol.to_string(), handler);
    }

    fn remove_stream_handler(&self, protocol: &str) {
        self.inner.handlers.remove(protocol);
    }

    async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<BoxStream, TransportError> {
        let target = self
            .inner
            .peers
            .get(peer)
            .map(|a| *a.value())
            .ok_or_else(|| TransportError::NoRoute(peer.clone()))?;
        let sock = self
            .inner
            .dial(peer, target, HelloKind::Stream, protocol)
            .await?;
        Ok(Box::new(TcpPeerStream {
            inner: sock,
            remote: peer.clone(),
            protocol: protocol.to_string(),
        }))
    }

    async fn connect(&self, addr: &PeerAddr) -> Result<(), TransportError> {
        let target = addr.addr.resolve().await?;
        self.inner.peers.insert(addr.peer.clone(), target);
        if self.connectedness(&addr.peer) == Connectedness::Connected {
            return Ok(());
        }
        let sock = self
            .inner
            .dial(&addr.peer, target, HelloKind::Link, "")
            .await?;
        self.inner.register_link(addr.peer.clone(), sock);
        Ok(())
    }

    fn connectedness(&self, peer: &PeerId) -> Connectedness {
        if self.inner.links.contains_key(peer) {
            Connectedness::Connected
        } else {
            Connectedness::NotConnected
        }
    }

    fn conn_manager(&self) -> &dyn ConnManager {
        &self.inner.protection
    }

    fn notify(&self, notifiee: Arc<dyn Notifiee>) -> SubscriptionId {
        self.inner.notifiers.subscribe(notifiee)
    }

    fn stop_notify(&self, id: SubscriptionId) {
        self.inner.notifiers.unsubscribe(id);
    }
}
