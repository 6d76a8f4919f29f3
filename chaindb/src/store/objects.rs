use serde::{Deserialize, Serialize};
use std::sync::Arc;
use weft_database::prelude::{CachedDbAccess, DbKey, DbWriter, StoreError, StoreResult, DB};
use weft_database::registry::DatabaseStorePrefixes;
use weft_hashes::{BlobHash, Hash, Hasher, HasherBase, TreeHash};

/// Storage-mode flag of a tree entry: whether the referenced object is a raw
/// blob or another tree.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum EntryMode {
    Blob,
    Tree,
}

/// On-disk entry of a tree object. Entries within a tree are strictly ordered
/// by name.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TreeEntryRecord {
    pub name: Vec<u8>,
    pub object_id: Hash,
    pub mode: EntryMode,
}

pub type TreeData = Arc<Vec<TreeEntryRecord>>;

/// Pointer to a stored header node: its chain coordinates plus the content id
/// of its tree object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct TreeEntry {
    pub height: u64,
    pub hash: Hash,
    pub object_id: Hash,
}

/// Position of a tree entry, counted from either end.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TreeIndex {
    FromStart(usize),
    FromEnd(usize),
}

/// Content-addressed object store over two DB buckets: opaque blobs and tree
/// objects. Writes are idempotent since object ids are derived from content.
#[derive(Clone)]
pub struct ObjectStore {
    blobs_access: CachedDbAccess<Hash, Arc<Vec<u8>>>,
    trees_access: CachedDbAccess<Hash, TreeData>,
}

impl ObjectStore {
    pub fn new(db: Arc<DB>, blob_cache_size: u64, tree_cache_size: u64) -> Self {
        Self {
            blobs_access: CachedDbAccess::new(Arc::clone(&db), blob_cache_size, DatabaseStorePrefixes::ObjectBlobs.into()),
            trees_access: CachedDbAccess::new(db, tree_cache_size, DatabaseStorePrefixes::ObjectTrees.into()),
        }
    }

    /// Content id of a blob.
    pub fn blob_id(bytes: &[u8]) -> Hash {
        BlobHash::hash(bytes)
    }

    /// Content id of a tree: a deterministic function of the full entry contents.
    pub fn tree_id(entries: &[TreeEntryRecord]) -> Hash {
        let mut hasher = TreeHash::new();
        for entry in entries {
            hasher
                .update((entry.name.len() as u64).to_le_bytes())
                .update(&entry.name)
                .update(entry.object_id)
                .update([entry.mode as u8]);
        }
        hasher.finalize()
    }

    pub fn write_blob(&self, writer: impl DbWriter, bytes: Vec<u8>) -> StoreResult<Hash> {
        let id = Self::blob_id(&bytes);
        self.blobs_access.write(writer, id, Arc::new(bytes))?;
        Ok(id)
    }

    /// Writes a tree object built from entries pre-sorted by name.
    pub fn build_tree(&self, writer: impl DbWriter, entries: Vec<TreeEntryRecord>) -> StoreResult<Hash> {
        if entries.is_empty() {
            return Err(StoreError::DataInconsistency("refusing to build an empty tree object".to_string()));
        }
        if !entries.windows(2).all(|pair| pair[0].name < pair[1].name) {
            return Err(StoreError::DataInconsistency("tree entries must be strictly sorted by name".to_string()));
        }
        let id = Self::tree_id(&entries);
        self.trees_access.write(writer, id, Arc::new(entries))?;
        Ok(id)
    }

    pub fn read_blob(&self, id: Hash) -> StoreResult<Arc<Vec<u8>>> {
        self.blobs_access.read(id)
    }

    pub fn read_tree(&self, id: Hash) -> StoreResult<TreeData> {
        let tree = self.trees_access.read(id)?;
        if tree.is_empty() {
            return Err(StoreError::DataInconsistency(format!("tree object {id} has no entries")));
        }
        Ok(tree)
    }

    /// Random-access read of a single tree entry.
    pub fn tree_entry_by_index(&self, id: Hash, index: TreeIndex) -> StoreResult<TreeEntryRecord> {
        let tree = self.read_tree(id)?;
        let pos = match index {
            TreeIndex::FromStart(i) => Some(i),
            TreeIndex::FromEnd(i) => tree.len().checked_sub(i + 1),
        };
        pos.and_then(|pos| tree.get(pos).cloned()).ok_or_else(|| {
            let requested = match index {
                TreeIndex::FromStart(i) | TreeIndex::FromEnd(i) => i,
            };
            StoreError::IndexOutOfBounds(requested, DbKey::new(self.trees_access.prefix(), id))
        })
    }

    pub fn has_tree(&self, id: Hash) -> StoreResult<bool> {
        self.trees_access.has(id)
    }
}
