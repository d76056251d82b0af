//! Version 1 wire records.

use prost::Message;

/// A request for a signature, sent by the requester as the only frame on a
/// fresh stream.
#[derive(Clone, PartialEq, Message)]
pub struct SigningRequest {
    /// Shared secret the responder was started with.
    #[prost(string, tag = "1")]
    pub auth_token: String,
    /// Address of the key the requester expects to sign.
    #[prost(string, tag = "2")]
    pub wallet_address: String,
    /// Discriminator selecting how `payload` is decoded and what gets signed.
    #[prost(string, tag = "3")]
    pub protocol_tag: String,
    /// Tag-specific payload.
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}

/// The responder's reply. Exactly one of `signature` or `error` is set.
#[derive(Clone, PartialEq, Message)]
pub struct SigningResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,
    #[prost(string, tag = "2")]
    pub error: String,
}

impl SigningResponse {
    pub fn signed(signature: Vec<u8>) -> Self {
        Self {
            signature,
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            signature: Vec::new(),
            error: error.into(),
        }
    }
}

/// Storage deal proposal as produced by the auction client.
///
/// Token amounts are decimal strings so arbitrarily large values survive the
/// round trip without a bignum dependency.
#[derive(Clone, PartialEq, Message)]
pub struct DealProposal {
    #[prost(string, tag = "1")]
    pub piece_cid: String,
    #[prost(uint64, tag = "2")]
    pub piece_size: u64,
    #[prost(bool, tag = "3")]
    pub verified_deal: bool,
    /// Wallet address of the client paying for the deal. This is the signer.
    #[prost(string, tag = "4")]
    pub client: String,
    #[prost(string, tag = "5")]
    pub provider: String,
    #[prost(string, tag = "6")]
    pub label: String,
    #[prost(int64, tag = "7")]
    pub start_epoch: i64,
    #[prost(int64, tag = "8")]
    pub end_epoch: i64,
    #[prost(string, tag = "9")]
    pub storage_price_per_epoch: String,
    #[prost(string, tag = "10")]
    pub provider_collateral: String,
    #[prost(string, tag = "11")]
    pub client_collateral: String,
}

impl DealProposal {
    /// The exact bytes a client signature over this proposal covers.
    ///
    /// prost writes known fields in tag order and drops unknown fields on
    /// decode, so decoding any valid encoding and calling this yields the same
    /// bytes on both ends of the protocol.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode a proposal from an untrusted payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(payload)
    }
}
