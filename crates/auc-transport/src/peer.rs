//! Peer identities and multiaddr-style peer addresses.
//!
//! Textual forms:
//!
//! ```text
//! /ip4/203.0.113.7/tcp/4001/p2p/<peer>
//! /ip6/2001:db8::1/tcp/4001/p2p/<peer>
//! /dns/relay.example.com/tcp/4001/p2p/<peer>
//! /ip4/203.0.113.7/tcp/4001/p2p/<relay>/p2p-circuit/p2p/<target>
//! ```

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

const CIRCUIT: &str = "p2p-circuit";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrError {
    #[error("empty peer id")]
    EmptyPeerId,
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
    #[error("unsupported address protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("invalid {field}: {value}")]
    InvalidComponent { field: &'static str, value: String },
    #[error("missing {0} component")]
    Missing(&'static str),
    #[error("unexpected trailing components: {0}")]
    Trailing(String),
}

/// Identity of a peer on the network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Result<Self, AddrError> {
        let id = id.into();
        if id.is_empty() {
            return Err(AddrError::EmptyPeerId);
        }
        if id.contains('/') || id.chars().any(char::is_whitespace) {
            return Err(AddrError::InvalidPeerId(id));
        }
        Ok(Self(id))
    }

    /// Derive a peer id from a public key: hex(sha256(key)).
    pub fn from_public_key(key: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Network location of a peer, without its identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NetAddr {
    Ip(SocketAddr),
    Dns { host: String, port: u16 },
}

impl NetAddr {
    /// Resolve to a socket address, doing a DNS lookup when needed.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            NetAddr::Ip(addr) => Ok(*addr),
            NetAddr::Dns { host, port } => tokio::net::lookup_host((host.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no addresses found for {}", host),
                    )
                }),
        }
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddr::Ip(SocketAddr::V4(a)) => write!(f, "/ip4/{}/tcp/{}", a.ip(), a.port()),
            NetAddr::Ip(SocketAddr::V6(a)) => write!(f, "/ip6/{}/tcp/{}", a.ip(), a.port()),
            NetAddr::Dns { host, port } => write!(f, "/dns/{}/tcp/{}", host, port),
        }
    }
}

impl From<SocketAddr> for NetAddr {
    fn from(addr: SocketAddr) -> Self {
        NetAddr::Ip(addr)
    }
}

/// A network address bound to a peer identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub addr: NetAddr,
    pub peer: PeerId,
}

impl PeerAddr {
    pub fn new(addr: impl Into<NetAddr>, peer: PeerId) -> Self {
        Self {
            addr: addr.into(),
            peer,
        }
    }

    /// Address through which `target` is reachable via this relay.
    pub fn relayed(&self, target: &PeerId) -> RelayedAddr {
        RelayedAddr {
            relay: self.clone(),
            target: target.clone(),
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/p2p/{}", self.addr, self.peer)
    }
}

impl FromStr for PeerAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = Components::new(s);
        let addr = parts.peer_addr()?;
        parts.finish()?;
        Ok(addr)
    }
}

/// A relay address plus circuit marker plus the peer reachable through it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RelayedAddr {
    pub relay: PeerAddr,
    pub target: PeerId,
}

impl fmt::Display for RelayedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/p2p/{}", self.relay, CIRCUIT, self.target)
    }
}

impl FromStr for RelayedAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = Components::new(s);
        let relay = parts.peer_addr()?;
        match parts.next() {
            Some(CIRCUIT) => {}
            Some(other) => return Err(AddrError::UnsupportedProtocol(other.to_string())),
            None => return Err(AddrError::Missing(CIRCUIT)),
        }
        let target = parts.p2p()?;
        parts.finish()?;
        Ok(RelayedAddr { relay, target })
    }
}

struct Components<'a> {
    inner: std::str::Split<'a, char>,
}

impl<'a> Components<'a> {
    fn new(s: &'a str) -> Self {
        let trimmed = s.trim();
        let s = trimmed.strip_prefix('/').unwrap_or(trimmed);
        Self { inner: s.split('/') }
    }

    fn next(&mut self) -> Option<&'a str> {
        self.inner.next().filter(|c| !c.is_empty())
    }

    fn value(&mut self, field: &'static str) -> Result<&'a str, AddrError> {
        self.next().ok_or(AddrError::Missing(field))
    }

    fn peer_addr(&mut self) -> Result<PeerAddr, AddrError> {
        let proto = self.value("network")?;
        let host = self.value("host")?;
        match self.value("transport")? {
            "tcp" => {}
            other => return Err(AddrError::UnsupportedProtocol(other.to_string())),
        }
        let port_str = self.value("port")?;
        let port: u16 = port_str.parse().map_err(|_| AddrError::InvalidComponent {
            field: "port",
            value: port_str.to_string(),
        })?;

        let addr = match proto {
            "ip4" | "ip6" => {
                let ip: IpAddr = host.parse().map_err(|_| AddrError::InvalidComponent {
                    field: "ip",
                    value: host.to_string(),
                })?;
                let want_v4 = proto == "ip4";
                if want_v4 != ip.is_ipv4() {
                    return Err(AddrError::InvalidComponent {
                        field: if want_v4 { "ip4" } else { "ip6" },
                        value: host.to_string(),
                    });
                }
                NetAddr::Ip(SocketAddr::new(ip, port))
            }
            "dns" | "dns4" | "dns6" => NetAddr::Dns {
                host: host.to_string(),
                port,
            },
            other => return Err(AddrError::UnsupportedProtocol(other.to_string())),
        };

        let peer = self.p2p()?;
        Ok(PeerAddr { addr, peer })
    }

    fn p2p(&mut self) -> Result<PeerId, AddrError> {
        match self.value("p2p")? {
            "p2p" | "ipfs" => PeerId::new(self.value("peer id")?),
            other => Err(AddrError::UnsupportedProtocol(other.to_string())),
        }
    }

    fn finish(mut self) -> Result<(), AddrError> {
        let rest: Vec<&str> = self.inner.by_ref().filter(|c| !c.is_empty()).collect();
        if rest.is_empty() {
            Ok(())
        } else {
            Err(AddrError::Trailing(rest.join("/")))
        }
    }
}
