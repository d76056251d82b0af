//! Signing service: the responder side of the protocol.
//!
//! Per inbound stream, under one absolute deadline:
//!
//! 1. read a framed `SigningRequest` (a bad frame drops the stream silently)
//! 2. check the auth token
//! 3. resolve the signing subject through the tag registry
//! 4. check the wallet holds the subject's key
//! 5. sign and reply
//!
//! Every failure after step 1 is answered with `SigningResponse.error`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use auc_proto::{SigningRequest, SigningResponse};
use auc_transport::{BoxStream, FrameCodec, FramingError, Host, PeerId, StreamHandler};
use auc_wallet::Wallet;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::SignerConfig;
use crate::error::{SignerError, ValidationError};
use crate::registry::TagRegistry;
use crate::PROTOCOL_ID;

/// Counters for served streams.
#[derive(Debug, Default)]
pub struct SignerStats {
    pub received: AtomicU64,
    pub signed: AtomicU64,
    pub rejected: AtomicU64,
    /// Streams dropped without a response: bad framing or deadline.
    pub aborted: AtomicU64,
}

impl SignerStats {
    pub fn snapshot(&self) -> SignerStatsSnapshot {
        SignerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            signed: self.signed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignerStatsSnapshot {
    pub received: u64,
    pub signed: u64,
    pub rejected: u64,
    pub aborted: u64,
}

struct SigningHandler {
    auth_token: String,
    wallet: Arc<dyn Wallet>,
    registry: Arc<TagRegistry>,
    config: SignerConfig,
    stats: Arc<SignerStats>,
}

impl SigningHandler {
    async fn serve(&self, stream: &mut BoxStream, peer: &PeerId) -> Result<(), FramingError> {
        let request: SigningRequest = FrameCodec::new(self.config.max_request_size)
            .read(stream)
            .await?;
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let response = match self.process(&request).await {
            Ok(signature) => {
                self.stats.signed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    peer = %peer,
                    tag = %request.protocol_tag,
                    "signed request"
                );
                SigningResponse::signed(signature)
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    peer = %peer,
                    tag = %request.protocol_tag,
                    wallet = %request.wallet_address,
                    error = ?e,
                    "rejecting signing request"
                );
                SigningResponse::failed(e.wire_message())
            }
        };

        FrameCodec::new(self.config.max_response_size)
            .write(stream, &response)
            .await
    }

    async fn process(&self, request: &SigningRequest) -> Result<Vec<u8>, SignerError> {
        if !constant_time_eq::constant_time_eq(
            request.auth_token.as_bytes(),
            self.auth_token.as_bytes(),
        ) {
            return Err(SignerError::Auth);
        }

        let subject = self.registry.resolve(
            &request.protocol_tag,
            &request.wallet_address,
            &request.payload,
        )?;

        let held = self
            .wallet
            .has(&subject.address)
            .await
            .map_err(|e| SignerError::WalletCheck(e.to_string()))?;
        if !held {
            return Err(ValidationError::UnknownSubject(subject.address).into());
        }

        let signature = self
            .wallet
            .sign(&subject.address, &subject.message)
            .await
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        // a response carries exactly one of signature or error
        if signature.is_empty() {
            return Err(SignerError::Signing(
                "wallet returned an empty signature".to_string(),
            ));
        }
        Ok(signature)
    }
}

#[async_trait]
impl StreamHandler for SigningHandler {
    async fn handle(&self, mut stream: BoxStream) {
        let peer = stream.remote_peer().clone();
        match tokio::time::timeout(self.config.stream_deadline, self.serve(&mut stream, &peer)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer, error = %e, "dropping signing stream");
            }
            Err(_) => {
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %peer, "signing stream deadline exceeded");
            }
        }
        if let Err(e) = stream.shutdown().await {
            debug!(peer = %peer, error = %e, "closing signing stream");
        }
    }
}

/// Signing responder bound to one host.
pub struct SignerService {
    host: Arc<dyn Host>,
    stats: Arc<SignerStats>,
}

impl SignerService {
    /// Register the signing protocol on `host` with the default tag rules.
    ///
    /// Fails when `auth_token` is empty.
    pub fn start(
        host: Arc<dyn Host>,
        auth_token: impl Into<String>,
        wallet: Arc<dyn Wallet>,
        config: SignerConfig,
    ) -> Result<Self, SignerError> {
        Self::start_with_registry(
            host,
            auth_token,
            wallet,
            Arc::new(TagRegistry::with_defaults()),
            config,
        )
    }

    /// Like [`SignerService::start`], with a caller-supplied tag registry.
    pub fn start_with_registry(
        host: Arc<dyn Host>,
        auth_token: impl Into<String>,
        wallet: Arc<dyn Wallet>,
        registry: Arc<TagRegistry>,
        config: SignerConfig,
    ) -> Result<Self, SignerError> {
        let auth_token = auth_token.into();
        if auth_token.is_empty() {
            return Err(SignerError::EmptyAuthToken);
        }

        let stats = Arc::new(SignerStats::default());
        let handler = SigningHandler {
            auth_token,
            wallet,
            registry: Arc::clone(&registry),
            config,
            stats: Arc::clone(&stats),
        };
        host.set_stream_handler(PROTOCOL_ID, Arc::new(handler));
        info!(
            peer = %host.id(),
            protocol = PROTOCOL_ID,
            tags = ?registry.tags(),
            "signer service started"
        );
        Ok(Self { host, stats })
    }

    pub fn stats(&self) -> SignerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting new signing streams. In-flight streams finish.
    pub fn stop(&self) {
        self.host.remove_stream_handler(PROTOCOL_ID);
        info!(peer = %self.host.id(), "signer service stopped");
    }
}
