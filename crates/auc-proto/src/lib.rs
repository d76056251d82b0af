//! Wire records for the remote wallet signing protocol.
//!
//! Messages are plain prost structs so the same definitions serve the
//! responder, the requester and any third-party implementation that speaks
//! protobuf. Field tags are part of the wire contract and must not change.

#![forbid(unsafe_code)]

pub mod v1;
pub mod validation;

mod proptests;

pub use v1::{DealProposal, SigningRequest, SigningResponse};
pub use validation::{ResponseOutcome, ValidationError, ValidationResult};
