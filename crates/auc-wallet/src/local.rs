//! In-memory ed25519 wallet.
//!
//! An address is the lowercase hex encoding of the 32-byte verifying key.

use std::collections::HashMap;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey, SECRET_KEY_LENGTH};
use rand_core::OsRng;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{Wallet, WalletError};

/// Address of the key: hex of its verifying key.
pub fn address_of(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().as_bytes())
}

/// Parse a hex-encoded 32-byte ed25519 secret key.
pub fn parse_secret_key(hex_secret: &str) -> Result<SigningKey, WalletError> {
    let raw = Zeroizing::new(
        hex::decode(hex_secret.trim()).map_err(|e| WalletError::InvalidKey(e.to_string()))?,
    );
    let bytes: &[u8; SECRET_KEY_LENGTH] = raw.as_slice().try_into().map_err(|_| {
        WalletError::InvalidKey(format!(
            "expected {} bytes, got {}",
            SECRET_KEY_LENGTH,
            raw.len()
        ))
    })?;
    Ok(SigningKey::from_bytes(bytes))
}

/// A fresh random ed25519 key.
pub fn generate_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Wallet holding a fixed set of ed25519 keys.
pub struct LocalWallet {
    keys: HashMap<String, SigningKey>,
}

impl LocalWallet {
    /// Build a wallet from `keys`. Fails when `keys` is empty.
    pub fn new(keys: impl IntoIterator<Item = SigningKey>) -> Result<Self, WalletError> {
        let keys: HashMap<String, SigningKey> =
            keys.into_iter().map(|k| (address_of(&k), k)).collect();
        if keys.is_empty() {
            return Err(WalletError::NoKeys);
        }
        debug!(count = keys.len(), "local wallet loaded");
        Ok(Self { keys })
    }

    /// Build a wallet from hex-encoded secret keys.
    pub fn from_hex_secrets<S: AsRef<str>>(secrets: &[S]) -> Result<Self, WalletError> {
        let keys = secrets
            .iter()
            .map(|s| parse_secret_key(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(keys)
    }

    /// Wallet with one freshly generated key.
    pub fn generate() -> Self {
        let key = generate_key();
        let address = address_of(&key);
        Self {
            keys: HashMap::from([(address, key)]),
        }
    }

    /// Addresses the wallet holds keys for, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.keys.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn contains(&self, address: &str) -> bool {
        self.keys.contains_key(address)
    }

    fn sign_sync(&self, address: &str, msg: &[u8]) -> Result<Vec<u8>, WalletError> {
        let key = self
            .keys
            .get(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.to_string()))?;
        Ok(key.sign(msg).to_bytes().to_vec())
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("addresses", &self.addresses())
            .finish()
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    async fn has(&self, address: &str) -> Result<bool, WalletError> {
        Ok(self.contains(address))
    }

    async fn sign(&self, address: &str, msg: &[u8]) -> Result<Vec<u8>, WalletError> {
        self.sign_sync(address, msg)
    }
}
