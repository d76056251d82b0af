//! Structural validation for decoded records.

use thiserror::Error;

use crate::v1::{SigningRequest, SigningResponse};

/// Validation error types for protocol records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Required field is empty
    #[error("required field '{field}' is empty")]
    EmptyField { field: &'static str },
    /// Response carries both a signature and an error
    #[error("response carries both a signature and an error")]
    AmbiguousResponse,
    /// Response carries neither a signature nor an error
    #[error("response carries neither a signature nor an error")]
    EmptyResponse,
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// What a well-formed response says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Signature(Vec<u8>),
    Error(String),
}

impl SigningResponse {
    /// Classify the response, rejecting records that break the
    /// signature-xor-error rule.
    pub fn into_outcome(self) -> ValidationResult<ResponseOutcome> {
        match (self.signature.is_empty(), self.error.is_empty()) {
            (false, true) => Ok(ResponseOutcome::Signature(self.signature)),
            (true, false) => Ok(ResponseOutcome::Error(self.error)),
            (false, false) => Err(ValidationError::AmbiguousResponse),
            (true, true) => Err(ValidationError::EmptyResponse),
        }
    }
}

impl SigningRequest {
    /// Checks a requester runs before putting a request on the wire.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.auth_token.is_empty() {
            return Err(ValidationError::EmptyField { field: "auth_token" });
        }
        if self.protocol_tag.is_empty() {
            return Err(ValidationError::EmptyField {
                field: "protocol_tag",
            });
        }
        Ok(())
    }
}
