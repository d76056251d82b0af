//! Error taxonomy for the signing protocol.
//!
//! Responder-side errors are sent to the caller as the response's `error`
//! string, so their `Display` output is part of the wire contract.

use auc_transport::{FramingError, TransportError};
use auc_wallet::WalletError;
use thiserror::Error;

/// Request content the responder (or the requester, before sending) refuses.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported protocol")]
    UnsupportedTag(String),

    #[error("malformed payload")]
    MalformedPayload(#[source] prost::DecodeError),

    #[error("missing wallet address")]
    MissingSubject,

    #[error("wallet address doesn't match payload subject")]
    SubjectMismatch { wallet_address: String, subject: String },

    #[error("wallet doesn't have keys for address")]
    UnknownSubject(String),
}

/// Malformed traffic: bad framing or a response that breaks the record rules.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Record(#[from] auc_proto::ValidationError),
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid auth token")]
    Auth,

    #[error("auth token must not be empty")]
    EmptyAuthToken,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("checking wallet keys: {0}")]
    WalletCheck(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("signature verification failed: {0}")]
    Verification(#[source] WalletError),

    #[error("remote error: {0}")]
    Remote(String),
}

impl From<FramingError> for SignerError {
    fn from(e: FramingError) -> Self {
        SignerError::Protocol(ProtocolError::Framing(e))
    }
}

impl From<auc_proto::ValidationError> for SignerError {
    fn from(e: auc_proto::ValidationError) -> Self {
        SignerError::Protocol(ProtocolError::Record(e))
    }
}

impl SignerError {
    /// Text the responder puts in `SigningResponse.error`.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }

    /// Error reported by the remote signer, if this is one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            SignerError::Remote(msg) => Some(msg),
            _ => None,
        }
    }
}
