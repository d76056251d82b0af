//! Protocol-tag registry.
//!
//! Each tag fixes one rule for turning `(walletAddress, payload)` into the
//! address that signs and the exact bytes it signs:
//!
//! | tag             | signing address         | bytes signed                            |
//! |-----------------|-------------------------|-----------------------------------------|
//! | `deal-proposal` | `DealProposal.client`   | canonical re-encoding of the proposal   |
//! | `deal-status`   | request `walletAddress` | payload bytes as sent                   |
//!
//! The requester applies the same rule to know what to verify against.

use std::collections::HashMap;
use std::sync::Arc;

use auc_proto::DealProposal;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::ValidationError;
use crate::{DEAL_PROPOSAL_TAG, DEAL_STATUS_TAG};

/// Address that must sign, and the bytes it signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningSubject {
    pub address: String,
    pub message: Vec<u8>,
}

/// Signing rule for one protocol tag.
pub trait TagHandler: Send + Sync {
    fn subject(&self, wallet_address: &str, payload: &[u8])
        -> Result<SigningSubject, ValidationError>;
}

/// `deal-proposal`: the proposal's client signs its canonical encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct DealProposalTag;

impl TagHandler for DealProposalTag {
    fn subject(
        &self,
        wallet_address: &str,
        payload: &[u8],
    ) -> Result<SigningSubject, ValidationError> {
        let proposal = DealProposal::from_payload(payload).map_err(ValidationError::MalformedPayload)?;
        if proposal.client.is_empty() {
            return Err(ValidationError::MissingSubject);
        }
        if !wallet_address.is_empty() && wallet_address != proposal.client {
            return Err(ValidationError::SubjectMismatch {
                wallet_address: wallet_address.to_string(),
                subject: proposal.client,
            });
        }
        let message = proposal.canonical_bytes();
        Ok(SigningSubject {
            address: proposal.client,
            message,
        })
    }
}

/// `deal-status`: the named wallet address signs the raw payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct DealStatusTag;

impl TagHandler for DealStatusTag {
    fn subject(
        &self,
        wallet_address: &str,
        payload: &[u8],
    ) -> Result<SigningSubject, ValidationError> {
        if wallet_address.is_empty() {
            return Err(ValidationError::MissingSubject);
        }
        Ok(SigningSubject {
            address: wallet_address.to_string(),
            message: payload.to_vec(),
        })
    }
}

/// Table of protocol tag to signing rule.
pub struct TagRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TagHandler>>>,
}

impl TagRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the `deal-proposal` and `deal-status` rules.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(DEAL_PROPOSAL_TAG, Arc::new(DealProposalTag));
        registry.register(DEAL_STATUS_TAG, Arc::new(DealStatusTag));
        registry
    }

    pub fn register(&self, tag: &str, handler: Arc<dyn TagHandler>) {
        self.handlers.write().insert(tag.to_string(), handler);
        debug!(tag, "registered signing rule");
    }

    pub fn unregister(&self, tag: &str) {
        self.handlers.write().remove(tag);
        debug!(tag, "unregistered signing rule");
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn TagHandler>> {
        self.handlers.read().get(tag).cloned()
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Apply the rule for `tag`.
    pub fn resolve(
        &self,
        tag: &str,
        wallet_address: &str,
        payload: &[u8],
    ) -> Result<SigningSubject, ValidationError> {
        let handler = self
            .get(tag)
            .ok_or_else(|| ValidationError::UnsupportedTag(tag.to_string()))?;
        handler.subject(wallet_address, payload)
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
