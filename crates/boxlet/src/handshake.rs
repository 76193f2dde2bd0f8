//! Identity handshake frame exchanged at connection start.
//!
//! A box announces itself by sending its 128-bit id as two big-endian u64
//! words. The controller does not consider a connection accepted until a
//! full 16-byte frame has been read.

use std::io;

use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Wire size of the identity frame: high u64 word + low u64 word.
pub const HANDSHAKE_LEN: usize = 16;

/// Unique identifier for a box instance.
///
/// UUID v4, generated at launch time. Collision resistance is the only
/// uniqueness guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxId(uuid::Uuid);

impl BoxId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Encode as a handshake frame: big-endian high word, then low word.
    pub fn to_frame(&self) -> [u8; HANDSHAKE_LEN] {
        let value = self.0.as_u128();
        let mut frame = [0u8; HANDSHAKE_LEN];
        frame[..8].copy_from_slice(&((value >> 64) as u64).to_be_bytes());
        frame[8..].copy_from_slice(&(value as u64).to_be_bytes());
        frame
    }

    /// Decode a handshake frame. Fails if fewer than 16 bytes are supplied.
    pub fn from_frame(bytes: &[u8]) -> Result<Self, MalformedHandshake> {
        if bytes.len() < HANDSHAKE_LEN {
            return Err(MalformedHandshake { got: bytes.len() });
        }
        let hi = u64::from_be_bytes(bytes[..8].try_into().expect("length checked"));
        let lo = u64::from_be_bytes(bytes[8..16].try_into().expect("length checked"));
        Ok(Self(uuid::Uuid::from_u128(((hi as u128) << 64) | lo as u128)))
    }
}

impl Default for BoxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BoxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The peer closed before sending a full 16-byte identity frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed handshake: expected 16 bytes, got {got}")]
pub struct MalformedHandshake {
    pub got: usize,
}

/// Codec for the fixed-size identity frame.
///
/// Works over any AsyncRead/AsyncWrite. Decode errors surface as
/// `io::Error` of kind `InvalidData`.
#[derive(Debug, Default)]
pub struct HandshakeCodec;

impl Decoder for HandshakeCodec {
    type Item = BoxId;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HANDSHAKE_LEN {
            return Ok(None);
        }
        let frame = src.split_to(HANDSHAKE_LEN);
        let id = BoxId::from_frame(&frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(id))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(id) => Ok(Some(id)),
            None if src.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                MalformedHandshake { got: src.len() },
            )),
        }
    }
}

impl Encoder<BoxId> for HandshakeCodec {
    type Error = io::Error;

    fn encode(&mut self, item: BoxId, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HANDSHAKE_LEN);
        dst.put_slice(&item.to_frame());
        Ok(())
    }
}
