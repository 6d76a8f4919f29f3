use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;
use weft_hashes::{Hash, Hasher, HeaderHash};

/// Identifies the braid strand a header belongs to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize, Deserialize)]
pub struct ChainId(pub u32);

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Byte length of the canonical header encoding.
pub const ENCODED_LEN: usize = 2 + 4 + 8 + 32 + 32 + 32 + 16 + 8 + 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCodecError {
    #[error("encoded header has {0} bytes, expected {}", ENCODED_LEN)]
    UnexpectedLength(usize),
}

/// A mined block header. Immutable once stored; identified by the hash of its
/// canonical encoding.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: Hash, // cached hash of the canonical encoding
    pub version: u16,
    pub chain_id: ChainId,
    pub height: u64,
    pub parent_hash: Hash,
    pub payload_hash: Hash,
    /// Difficulty target, big endian.
    pub target: [u8; 32],
    /// Accumulated proof-of-work weight.
    pub weight: u128,
    pub timestamp: u64, // timestamp is in millis
    pub nonce: u64,
}

impl BlockHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: u16,
        chain_id: ChainId,
        height: u64,
        parent_hash: Hash,
        payload_hash: Hash,
        target: [u8; 32],
        weight: u128,
        timestamp: u64,
        nonce: u64,
    ) -> Self {
        let mut header =
            Self { hash: Hash::default(), version, chain_id, height, parent_hash, payload_hash, target, weight, timestamp, nonce };
        header.hash = HeaderHash::hash(header.encode());
        header
    }

    /// The canonical byte encoding: fixed-width little-endian fields in
    /// declaration order, excluding the cached hash. Deterministic, and the
    /// hashing preimage.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENCODED_LEN);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.chain_id.0.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(self.parent_hash.as_bytes());
        out.extend_from_slice(self.payload_hash.as_bytes());
        out.extend_from_slice(&self.target);
        out.extend_from_slice(&self.weight.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderCodecError> {
        if bytes.len() != ENCODED_LEN {
            return Err(HeaderCodecError::UnexpectedLength(bytes.len()));
        }
        let mut reader = FieldReader { bytes, pos: 0 };
        let version = u16::from_le_bytes(reader.take());
        let chain_id = ChainId(u32::from_le_bytes(reader.take()));
        let height = u64::from_le_bytes(reader.take());
        let parent_hash = Hash::from_bytes(reader.take());
        let payload_hash = Hash::from_bytes(reader.take());
        let target = reader.take();
        let weight = u128::from_le_bytes(reader.take());
        let timestamp = u64::from_le_bytes(reader.take());
        let nonce = u64::from_le_bytes(reader.take());
        Ok(Self {
            hash: HeaderHash::hash(bytes),
            version,
            chain_id,
            height,
            parent_hash,
            payload_hash,
            target,
            weight,
            timestamp,
            nonce,
        })
    }
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl FieldReader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let field = self.bytes[self.pos..self.pos + N].try_into().expect("total length is checked before reading fields");
        self.pos += N;
        field
    }
}
