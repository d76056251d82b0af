//! Peer-addressed stream transport for the remote wallet signer.
//!
//! The signing protocol only needs a small slice of a peer-to-peer host:
//! open a stream to a peer for a protocol, register a handler for inbound
//! streams, dial a peer, and a connection manager that can protect a
//! connection from pruning. This crate defines that slice as traits, plus the
//! varint framing shared by both ends and two host implementations:
//!
//! - [`testing::MemoryNetwork`]: in-process hosts joined by duplex pipes,
//!   with knobs for simulating disconnects and dial failures.
//! - [`tcp::TcpHost`]: a plain TCP host used by the wallet daemon.

#![forbid(unsafe_code)]

pub mod connmgr;
pub mod framing;
pub mod peer;
pub mod tcp;
pub mod testing;
pub mod traits;

pub use connmgr::{NotifierSet, ProtectionTable};
pub use framing::{FrameCodec, FramingError, DEFAULT_MAX_MESSAGE_SIZE};
pub use peer::{AddrError, NetAddr, PeerAddr, PeerId, RelayedAddr};
pub use traits::*;
