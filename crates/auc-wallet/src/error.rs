use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet needs at least one key")]
    NoKeys,

    #[error("no key for address {0}")]
    UnknownAddress(String),

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("wallet backend: {0}")]
    Backend(String),
}
