use crate::header::ChainId;
use thiserror::Error;
use weft_database::prelude::StoreError;
use weft_hashes::Hash;

#[derive(Error, Debug)]
pub enum ChainDbError {
    #[error("no ancestor at height {0} is reachable from the given node")]
    AncestorNotFound(u64),

    #[error("tree object {0} has no parent entry")]
    ParentNotFound(Hash),

    #[error("cannot insert header {hash} at height {height}: parent {parent} is not stored")]
    MissingParent { height: u64, hash: Hash, parent: Hash },

    #[error("invalid genesis header {0}: genesis is injected only at store initialization")]
    InvalidGenesis(Hash),

    #[error("reorg head {0} is not present in the store")]
    MissingHead(Hash),

    #[error("no common ancestor found within {limit} headers of the fork heads")]
    ForkTooDeep { limit: u64 },

    #[error("header belongs to chain {got} but this store indexes chain {expected}")]
    ChainMismatch { expected: ChainId, got: ChainId },

    #[error("corrupt store data in {op} ({id}): {reason}")]
    Corruption { op: &'static str, id: Hash, reason: String },

    #[error("store backend failure: {0}")]
    Backend(#[from] StoreError),
}

pub type ChainDbResult<T> = std::result::Result<T, ChainDbError>;
