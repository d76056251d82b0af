//! Remote wallet signing protocol.
//!
//! A [`SignerService`] registers a stream handler on a transport host and
//! signs deal records on behalf of a [`Wallet`] for authenticated callers.
//! A [`SigningClient`] sends one request per stream and verifies the
//! returned signature locally before handing it back.
//!
//! Which address signs and which bytes get signed depend on the request's
//! protocol tag; [`registry::TagRegistry`] holds those rules.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod registry;
pub mod requester;
pub mod responder;

pub use auc_wallet::{Verifier, Wallet};
pub use config::SignerConfig;
pub use error::{ProtocolError, SignerError, ValidationError};
pub use registry::{DealProposalTag, DealStatusTag, SigningSubject, TagHandler, TagRegistry};
pub use requester::{validate_deal_proposal_signature, validate_deal_status_signature, SigningClient};
pub use responder::{SignerService, SignerStats, SignerStatsSnapshot};

/// Stream protocol identifier the responder registers.
pub const PROTOCOL_ID: &str = "/auctions/proposal-signer/1.0.0";

/// Tag for signing a `DealProposal` as its client.
pub const DEAL_PROPOSAL_TAG: &str = "deal-proposal";

/// Tag for signing an opaque deal-status payload as the named wallet address.
pub const DEAL_STATUS_TAG: &str = "deal-status";
