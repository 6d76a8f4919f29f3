//! Name encodings shared by tree entries and refs.
//!
//! A node at `(height, hash)` is named `<hexheight>.<base64urlhash>` where the
//! height is 16 lowercase hex digits (big endian) and the hash is base64url
//! without padding. Byte order of names therefore equals `(height, hash)`
//! order, which keeps tree entries and ref listings sorted by rank for free.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::fmt::{Debug, Display, Formatter};
use weft_hashes::Hash;

/// Namespace of the one-per-stored-header refs.
pub const HEADER_NAMESPACE: &str = "bh";
/// Namespace of the one-per-current-leaf refs.
pub const LEAF_NAMESPACE: &str = "leaf";

const RANK_HEX_LEN: usize = 16;
const HASH_B64_LEN: usize = 43; // 32 bytes, base64 unpadded

/// 16 lowercase hex digits, big endian zero padded.
pub fn encode_rank(height: u64) -> String {
    faster_hex::hex_string(&height.to_be_bytes())
}

pub fn decode_rank(encoded: &[u8]) -> Option<u64> {
    if encoded.len() != RANK_HEX_LEN {
        return None;
    }
    let mut bytes = [0u8; 8];
    faster_hex::hex_decode(encoded, &mut bytes).ok()?;
    Some(u64::from_be_bytes(bytes))
}

pub fn encode_hash_part(hash: Hash) -> String {
    URL_SAFE_NO_PAD.encode(hash.as_bytes())
}

pub fn decode_hash_part(encoded: &[u8]) -> Option<Hash> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    Hash::try_from(&bytes[..]).ok()
}

/// `<hexheight>.<base64urlhash>`
pub fn entry_name(height: u64, hash: Hash) -> Vec<u8> {
    let mut name = Vec::with_capacity(RANK_HEX_LEN + 1 + HASH_B64_LEN);
    name.extend_from_slice(encode_rank(height).as_bytes());
    name.push(b'.');
    name.extend_from_slice(encode_hash_part(hash).as_bytes());
    name
}

pub fn parse_entry_name(name: &[u8]) -> Option<(u64, Hash)> {
    let dot = name.iter().position(|&b| b == b'.')?;
    let height = decode_rank(&name[..dot])?;
    let hash = decode_hash_part(&name[dot + 1..])?;
    Some((height, hash))
}

/// A named reference, `<namespace>/<hexheight>.<base64urlhash>` on disk.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(Vec<u8>);

impl RefName {
    pub fn header(height: u64, hash: Hash) -> Self {
        Self::in_namespace(HEADER_NAMESPACE, height, hash)
    }

    pub fn leaf(height: u64, hash: Hash) -> Self {
        Self::in_namespace(LEAF_NAMESPACE, height, hash)
    }

    pub fn in_namespace(namespace: &str, height: u64, hash: Hash) -> Self {
        let mut name = Vec::with_capacity(namespace.len() + 1 + RANK_HEX_LEN + 1 + HASH_B64_LEN);
        name.extend_from_slice(namespace.as_bytes());
        name.push(b'/');
        name.extend_from_slice(&entry_name(height, hash));
        RefName(name)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Extracts `(height, hash)`, requiring the given namespace. `None` for
    /// names this store did not produce.
    pub fn parse(&self, namespace: &str) -> Option<(u64, Hash)> {
        let rest = self.0.strip_prefix(namespace.as_bytes())?;
        let rest = rest.strip_prefix(b"/")?;
        parse_entry_name(rest)
    }
}

impl AsRef<[u8]> for RefName {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> TryFrom<&'a [u8]> for RefName {
    type Error = std::convert::Infallible;

    fn try_from(bytes: &'a [u8]) -> Result<Self, Self::Error> {
        Ok(RefName(bytes.to_vec()))
    }
}

impl Display for RefName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&String::from_utf8_lossy(&self.0), f)
    }
}

impl Debug for RefName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Glob matching every ref in a namespace, e.g. `leaf/*`.
pub fn namespace_pattern(namespace: &str) -> Vec<u8> {
    format!("{namespace}/*").into_bytes()
}

/// Glob matching every ref at one height, e.g. `bh/<hexheight>.*`.
pub fn rank_pattern(namespace: &str, height: u64) -> Vec<u8> {
    format!("{namespace}/{}.*", encode_rank(height)).into_bytes()
}
