use super::keys::RefName;
use std::sync::Arc;
use weft_database::prelude::{CachedDbAccess, DbKey, DbWriter, StoreError, StoreResult, DB};
use weft_database::registry::DatabaseStorePrefixes;
use weft_hashes::Hash;

/// The mutable name -> object id index. Ref names are the on-disk key bytes,
/// so external tooling sees `bh/...` and `leaf/...` verbatim.
#[derive(Clone)]
pub struct RefIndex {
    access: CachedDbAccess<RefName, Hash>,
}

impl RefIndex {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self { access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::Refs.into()) }
    }

    pub fn has(&self, name: &RefName) -> StoreResult<bool> {
        self.access.has(name.clone())
    }

    pub fn lookup(&self, name: &RefName) -> StoreResult<Hash> {
        self.access.read(name.clone())
    }

    /// Creates or overwrites the ref. With `overwrite` unset an existing ref
    /// is an error.
    pub fn set(&self, writer: impl DbWriter, name: RefName, id: Hash, overwrite: bool) -> StoreResult<()> {
        if !overwrite && self.has(&name)? {
            return Err(StoreError::KeyAlreadyExists(name.to_string()));
        }
        self.access.write(writer, name, id)
    }

    pub fn delete(&self, writer: impl DbWriter, name: RefName) -> StoreResult<()> {
        if !self.has(&name)? {
            return Err(StoreError::KeyNotFound(DbKey::new(self.access.prefix(), name)));
        }
        self.access.delete(writer, name)
    }

    /// Enumerates refs whose name matches the glob pattern (`*` wildcards
    /// anywhere). Result order is unspecified; callers sort.
    pub fn list(&self, pattern: &[u8]) -> StoreResult<Vec<(RefName, Hash)>> {
        let literal_prefix = &pattern[..pattern.iter().position(|&b| b == b'*').unwrap_or(pattern.len())];
        self.access
            .seek_iterator(Some(literal_prefix), None, usize::MAX, false)
            .filter(|item| match item {
                Ok((name, _)) => glob_match(pattern, name.as_bytes()),
                Err(_) => true,
            })
            .collect()
    }
}

/// Matches `pattern` (literal bytes plus `*` wildcards) against `input`.
fn glob_match(pattern: &[u8], input: &[u8]) -> bool {
    let (mut p, mut i) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while i < input.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, i));
            p += 1;
        } else if p < pattern.len() && pattern[p] == input[i] {
            p += 1;
            i += 1;
        } else if let Some((star, matched)) = backtrack {
            // Let the last star consume one more byte and retry
            backtrack = Some((star, matched + 1));
            p = star + 1;
            i = matched + 1;
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&b| b == b'*')
}
