use std::time::Duration;

use auc_transport::DEFAULT_MAX_MESSAGE_SIZE;

/// Bounds shared by the responder and the requester.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    /// Absolute deadline for one stream, from open to close.
    pub stream_deadline: Duration,
    pub max_request_size: usize,
    pub max_response_size: usize,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            stream_deadline: Duration::from_secs(60),
            max_request_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_response_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
