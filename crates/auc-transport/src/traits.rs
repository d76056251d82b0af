//! Host, stream and connection-manager traits.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::framing::FramingError;
use crate::peer::{PeerAddr, PeerId};

/// A bidirectional byte stream to a remote peer, opened for one protocol.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {
    fn remote_peer(&self) -> &PeerId;
    fn protocol(&self) -> &str;
}

pub type BoxStream = Box<dyn Stream>;

/// Handler for inbound streams of a registered protocol.
///
/// Each inbound stream gets its own task; handlers must not assume any
/// ordering between streams.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: BoxStream);
}

/// Whether the host currently holds a live connection to a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectedness {
    NotConnected,
    Connected,
}

impl std::fmt::Display for Connectedness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectedness::NotConnected => f.write_str("not-connected"),
            Connectedness::Connected => f.write_str("connected"),
        }
    }
}

/// Tags connections to peers as exempt from pruning.
pub trait ConnManager: Send + Sync {
    fn protect(&self, peer: &PeerId, tag: &str);
    /// Remove one protection tag. Returns whether the peer is still
    /// protected under some other tag.
    fn unprotect(&self, peer: &PeerId, tag: &str) -> bool;
    /// With `tag = None`, reports protection under any tag.
    fn is_protected(&self, peer: &PeerId, tag: Option<&str>) -> bool;
}

/// Observer for connection lifecycle events.
///
/// Called from the host's own tasks; implementations must return quickly
/// and hand any real work off elsewhere.
pub trait Notifiee: Send + Sync {
    fn connected(&self, peer: &PeerId);
    fn disconnected(&self, peer: &PeerId);
}

/// Handle returned by [`Host::notify`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// The slice of a peer-to-peer host that the signer and relay manager use.
///
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait Host: Send + Sync {
    fn id(&self) -> &PeerId;

    fn set_stream_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>);
    fn remove_stream_handler(&self, protocol: &str);

    /// Open a new stream to `peer` speaking `protocol`.
    async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<BoxStream, TransportError>;

    /// Dial `addr` and keep a connection to it open.
    async fn connect(&self, addr: &PeerAddr) -> Result<(), TransportError>;

    fn connectedness(&self, peer: &PeerId) -> Connectedness;

    fn conn_manager(&self) -> &dyn ConnManager;

    fn notify(&self, notifiee: Arc<dyn Notifiee>) -> SubscriptionId;
    fn stop_notify(&self, id: SubscriptionId);
}

/// Common transport error type
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no known route to peer {0}")]
    NoRoute(PeerId),

    #[error("peer does not support protocol {0}")]
    ProtocolNotSupported(String),

    #[error("dial failed: {0}")]
    Dial(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("host closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
}
