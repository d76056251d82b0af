//! Varint length-prefixed framing for protobuf records.
//!
//! Format: unsigned LEB128 varint length || record bytes.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default bound for request and response frames (100 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 << 10;

/// Longest possible encoding of a u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Framing error
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("message too large: {len} bytes (max: {max})")]
    TooLarge { len: u64, max: usize },

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("invalid length prefix")]
    InvalidLength,

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FramingError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FramingError::UnexpectedEof
        } else {
            FramingError::Io(e)
        }
    }
}

/// Accumulates varint bytes. Returns the value once the final byte is seen.
#[derive(Default)]
struct VarintReader {
    value: u64,
    read: usize,
}

impl VarintReader {
    fn push(&mut self, byte: u8) -> Result<Option<u64>, FramingError> {
        if self.read == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(FramingError::InvalidLength);
        }
        self.value |= u64::from(byte & 0x7f) << (7 * self.read);
        self.read += 1;
        if byte & 0x80 == 0 {
            return Ok(Some(self.value));
        }
        if self.read == MAX_VARINT_LEN {
            return Err(FramingError::InvalidLength);
        }
        Ok(None)
    }
}

fn put_uvarint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Length-prefixed record codec with a bound on the declared length.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_size: usize,
}

impl FrameCodec {
    /// Create a new codec with the specified maximum record size
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn check_len(&self, len: u64) -> Result<usize, FramingError> {
        if len > self.max_size as u64 {
            return Err(FramingError::TooLarge {
                len,
                max: self.max_size,
            });
        }
        Ok(len as usize)
    }

    /// Encode a record with its varint length prefix.
    pub fn encode<M: Message>(&self, msg: &M) -> Result<Bytes, FramingError> {
        let len = self.check_len(msg.encoded_len() as u64)?;
        let mut framed = BytesMut::with_capacity(MAX_VARINT_LEN + len);
        put_uvarint(&mut framed, len as u64);
        msg.encode_raw(&mut framed);
        Ok(framed.freeze())
    }

    /// Decode one record from the front of a buffer.
    pub fn decode<M: Message + Default>(&self, framed: &[u8]) -> Result<M, FramingError> {
        let mut varint = VarintReader::default();
        let mut pos = 0;
        let len = loop {
            let byte = *framed.get(pos).ok_or(FramingError::UnexpectedEof)?;
            pos += 1;
            if let Some(len) = varint.push(byte)? {
                break self.check_len(len)?;
            }
        };
        let body = framed
            .get(pos..pos + len)
            .ok_or(FramingError::UnexpectedEof)?;
        Ok(M::decode(body)?)
    }

    /// Read one record from a stream.
    ///
    /// The declared length is checked against the bound before any of the
    /// body is read or allocated.
    pub async fn read<M, R>(&self, r: &mut R) -> Result<M, FramingError>
    where
        M: Message + Default,
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut varint = VarintReader::default();
        let len = loop {
            let byte = r.read_u8().await?;
            if let Some(len) = varint.push(byte)? {
                break self.check_len(len)?;
            }
        };

        let mut body = vec![0u8; len];
        r.read_exact(&mut body).await?;
        Ok(M::decode(body.as_slice())?)
    }

    /// Write one record to a stream and flush it.
    pub async fn write<M, W>(&self, w: &mut W, msg: &M) -> Result<(), FramingError>
    where
        M: Message,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let framed = self.encode(msg)?;
        w.write_all(&framed).await?;
        w.flush().await?;
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, PartialEq, Message)]
    struct Blob {
        #[prost(bytes = "vec", tag = "1")]
        data: Vec<u8>,
    }

    fn prefix(len: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, len);
        buf
    }

    #[test]
    fn test_encode_decode() {
        let codec = FrameCodec::default();
        let msg = Blob {
            data: b"hello world".to_vec(),
        };
        let framed = codec.encode(&msg).unwrap();
        assert_eq!(framed[0] as usize, msg.encoded_len());
        let decoded: Blob = codec.decode(&framed).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_varint_prefix_multi_byte() {
        assert_eq!(prefix(300), vec![0xac, 0x02]);
        let codec = FrameCodec::new(1024);
        let msg = Blob {
            data: vec![9u8; 300],
        };
        let framed = codec.encode(&msg).unwrap();
        let decoded: Blob = codec.decode(&framed).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_encode_too_large() {
        let codec = FrameCodec::new(16);
        let msg = Blob { data: vec![0u8; 64] };
        assert!(matches!(
            codec.encode(&msg),
            Err(FramingError::TooLarge { max: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_read_rejects_oversize_before_reading_body() {
        let codec = FrameCodec::new(DEFAULT_MAX_MESSAGE_SIZE);
        let declared = 1u64 << 30;
        let mut wire = prefix(declared);
        let prefix_len = wire.len();
        wire.extend_from_slice(&[0u8; 32]);

        let mut reader: &[u8] = &wire;
        let err = codec.read::<Blob, _>(&mut reader).await.unwrap_err();
        assert!(matches!(err, FramingError::TooLarge { len, .. } if len == declared));
        assert!(err.to_string().contains("message too large"));
        // Only the prefix was consumed.
        assert_eq!(reader.len(), wire.len() - prefix_len);
    }

    #[tokio::test]
    async fn test_read_short_body_is_error() {
        let codec = FrameCodec::default();
        let mut wire = prefix(10);
        wire.extend_from_slice(&[1, 2, 3, 4, 5]);
        let mut reader: &[u8] = &wire;
        assert!(matches!(
            codec.read::<Blob, _>(&mut reader).await,
            Err(FramingError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_read_eof_inside_prefix() {
        let codec = FrameCodec::default();
        let mut reader: &[u8] = &[0x80];
        assert!(matches!(
            codec.read::<Blob, _>(&mut reader).await,
            Err(FramingError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_read_overlong_varint() {
        let codec = FrameCodec::default();
        let mut reader: &[u8] = &[0xff; 11];
        assert!(matches!(
            codec.read::<Blob, _>(&mut reader).await,
            Err(FramingError::InvalidLength)
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_over_pipe() {
        let codec = FrameCodec::default();
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = Blob {
            data: b"over the pipe".to_vec(),
        };
        codec.write(&mut a, &msg).await.unwrap();
        let got: Blob = codec.read(&mut b).await.unwrap();
        assert_eq!(got, msg);
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let codec = FrameCodec::new(128);
            let _ = codec.decode::<Blob>(&data);
        }

        #[test]
        fn prop_declared_length_bound(len in 0u64..(1 << 40)) {
            let codec = FrameCodec::new(4096);
            let mut wire = prefix(len);
            wire.extend_from_slice(&[0u8; 8]);
            let res = codec.decode::<Blob>(&wire);
            if len > 4096 {
                let is_too_large = matches!(res, Err(FramingError::TooLarge { .. }));
                prop_assert!(is_too_large);
            }
        }
    }
}
