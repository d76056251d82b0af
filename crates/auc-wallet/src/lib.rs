//! Wallet capabilities for the remote wallet signer.
//!
//! The signing protocol never touches key material directly. It talks to a
//! [`Wallet`] that can say whether it holds a key for an address and sign
//! bytes with it, and to a [`Verifier`] that checks a signature against an
//! address. [`LocalWallet`] and [`Ed25519Verifier`] are the in-process
//! ed25519 implementations used by the daemon and the tests.

#![forbid(unsafe_code)]

use async_trait::async_trait;

pub mod error;
pub mod local;
pub mod verify;

pub use error::WalletError;
pub use local::{address_of, generate_key, parse_secret_key, LocalWallet};
pub use verify::Ed25519Verifier;

/// Key holder able to sign on behalf of the addresses it owns.
///
/// Must tolerate concurrent calls from many in-flight requests.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Whether the wallet holds a key for `address`.
    async fn has(&self, address: &str) -> Result<bool, WalletError>;

    /// Sign `msg` with the key for `address`.
    async fn sign(&self, address: &str, msg: &[u8]) -> Result<Vec<u8>, WalletError>;
}

/// Checks signatures produced by a [`Wallet`].
pub trait Verifier: Send + Sync {
    fn verify(&self, address: &str, msg: &[u8], signature: &[u8]) -> Result<(), WalletError>;
}
