//! Requester side: one signing request per stream, verified before return.

use std::sync::Arc;

use auc_proto::{DealProposal, ResponseOutcome, SigningRequest, SigningResponse};
use auc_transport::{FrameCodec, Host, PeerId, TransportError};
use auc_wallet::Verifier;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::SignerConfig;
use crate::error::SignerError;
use crate::registry::{DealProposalTag, DealStatusTag, SigningSubject, TagHandler, TagRegistry};
use crate::{DEAL_PROPOSAL_TAG, DEAL_STATUS_TAG, PROTOCOL_ID};

/// Client for a remote signing service.
pub struct SigningClient {
    host: Arc<dyn Host>,
    verifier: Arc<dyn Verifier>,
    registry: Arc<TagRegistry>,
    config: SignerConfig,
}

impl SigningClient {
    pub fn new(host: Arc<dyn Host>, verifier: Arc<dyn Verifier>, config: SignerConfig) -> Self {
        Self {
            host,
            verifier,
            registry: Arc::new(TagRegistry::with_defaults()),
            config,
        }
    }

    /// Use `registry` to derive what each tag's signature must cover.
    pub fn with_registry(mut self, registry: Arc<TagRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Ask `peer` to sign `payload` under `protocol_tag` and verify the result.
    ///
    /// The expected signer and signed bytes are derived locally with the same
    /// tag rule the responder uses, so an unknown tag fails before anything is
    /// sent.
    pub async fn request_signature(
        &self,
        peer: &PeerId,
        auth_token: &str,
        wallet_address: &str,
        protocol_tag: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, SignerError> {
        let expected = self
            .registry
            .resolve(protocol_tag, wallet_address, &payload)?;

        let request = SigningRequest {
            auth_token: auth_token.to_string(),
            wallet_address: wallet_address.to_string(),
            protocol_tag: protocol_tag.to_string(),
            payload,
        };
        request.validate()?;

        let response = tokio::time::timeout(self.config.stream_deadline, self.exchange(peer, &request))
            .await
            .map_err(|_| SignerError::Network(TransportError::Timeout))??;

        match response.into_outcome()? {
            ResponseOutcome::Error(msg) => {
                debug!(peer = %peer, tag = protocol_tag, error = %msg, "signer refused request");
                Err(SignerError::Remote(msg))
            }
            ResponseOutcome::Signature(signature) => {
                verify(self.verifier.as_ref(), &expected, &signature).map_err(|e| {
                    warn!(peer = %peer, tag = protocol_tag, "signer returned a bad signature");
                    e
                })?;
                Ok(signature)
            }
        }
    }

    /// Ask `peer` to sign `proposal` as its client.
    pub async fn request_deal_proposal_signature(
        &self,
        peer: &PeerId,
        auth_token: &str,
        proposal: &DealProposal,
    ) -> Result<Vec<u8>, SignerError> {
        self.request_signature(
            peer,
            auth_token,
            &proposal.client,
            DEAL_PROPOSAL_TAG,
            proposal.canonical_bytes(),
        )
        .await
    }

    /// Ask `peer` to sign a deal-status payload as `wallet_address`.
    pub async fn request_deal_status_signature(
        &self,
        peer: &PeerId,
        auth_token: &str,
        wallet_address: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, SignerError> {
        self.request_signature(
            peer,
            auth_token,
            wallet_address,
            DEAL_STATUS_TAG,
            payload.to_vec(),
        )
        .await
    }

    async fn exchange(
        &self,
        peer: &PeerId,
        request: &SigningRequest,
    ) -> Result<SigningResponse, SignerError> {
        let mut stream = self.host.new_stream(peer, PROTOCOL_ID).await?;
        FrameCodec::new(self.config.max_request_size)
            .write(&mut stream, request)
            .await?;
        let response: SigningResponse = FrameCodec::new(self.config.max_response_size)
            .read(&mut stream)
            .await?;
        if let Err(e) = stream.shutdown().await {
            debug!(peer = %peer, error = %e, "closing signing stream");
        }
        Ok(response)
    }
}

fn verify(
    verifier: &dyn Verifier,
    expected: &SigningSubject,
    signature: &[u8],
) -> Result<(), SignerError> {
    verifier
        .verify(&expected.address, &expected.message, signature)
        .map_err(SignerError::Verification)
}

/// Check a client signature over `proposal`.
pub fn validate_deal_proposal_signature(
    verifier: &dyn Verifier,
    proposal: &DealProposal,
    signature: &[u8],
) -> Result<(), SignerError> {
    let expected = DealProposalTag.subject("", &proposal.canonical_bytes())?;
    verify(verifier, &expected, signature)
}

/// Check a signature by `wallet_address` over a deal-status payload.
pub fn validate_deal_status_signature(
    verifier: &dyn Verifier,
    wallet_address: &str,
    payload: &[u8],
    signature: &[u8],
) -> Result<(), SignerError> {
    let expected = DealStatusTag.subject(wallet_address, payload)?;
    verify(verifier, &expected, signature)
}
