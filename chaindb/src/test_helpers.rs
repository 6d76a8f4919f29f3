//! Shared builders for store tests.

use crate::header::{BlockHeader, ChainId};
use crate::headerdb::{HeaderDb, Insertion};
use rand::Rng;
use weft_hashes::Hash;

pub fn genesis_header(chain_id: ChainId) -> BlockHeader {
    BlockHeader::new(1, chain_id, 0, Hash::default(), Hash::from_u64_word(0xfeed), [0xff; 32], 0, 1_600_000_000_000, 0)
}

/// A header extending `parent`, with the nonce doubling as entropy so distinct
/// nonces yield distinct siblings.
pub fn child_header(parent: &BlockHeader, nonce: u64) -> BlockHeader {
    BlockHeader::new(
        parent.version,
        parent.chain_id,
        parent.height + 1,
        parent.hash,
        Hash::from_u64_word(nonce ^ 0xcafe),
        parent.target,
        parent.weight + 1,
        parent.timestamp + 30_000,
        nonce,
    )
}

/// Inserts a linear chain of `len` blocks on top of `genesis` and returns all
/// headers from genesis to tip, indexed by height.
pub fn insert_chain(store: &HeaderDb, genesis: &BlockHeader, len: usize) -> Vec<BlockHeader> {
    let mut chain = vec![genesis.clone()];
    for nonce in 0..len as u64 {
        let header = child_header(chain.last().unwrap(), nonce);
        assert_eq!(store.insert(&header).unwrap(), Insertion::Inserted);
        chain.push(header);
    }
    chain
}

/// A header with every field randomized. Codec tests only; the result has no
/// consistent lineage.
pub fn random_header(rng: &mut impl Rng) -> BlockHeader {
    BlockHeader::new(
        rng.gen(),
        ChainId(rng.gen()),
        rng.gen(),
        Hash::from_bytes(rng.gen()),
        Hash::from_bytes(rng.gen()),
        rng.gen(),
        rng.gen(),
        rng.gen(),
        rng.gen(),
    )
}
