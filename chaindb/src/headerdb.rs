//! The per-chain header database: a content-addressed tree store where every
//! node embeds pointers to its spectrum ancestors, plus a mutable ref index
//! tracking all stored headers (`bh/`) and the current branch tips (`leaf/`).

use itertools::Itertools;
use log::{debug, info, warn};
use parking_lot::RwLock;
use rocksdb::WriteBatch;
use std::sync::Arc;
use weft_database::prelude::{BatchDbWriter, StoreError, DB};
use weft_hashes::Hash;

use crate::errors::{ChainDbError, ChainDbResult};
use crate::header::{BlockHeader, ChainId};
use crate::spectrum::spectrum;
use crate::store::keys::{self, RefName, HEADER_NAMESPACE, LEAF_NAMESPACE};
use crate::store::objects::{EntryMode, ObjectStore, TreeData, TreeEntry, TreeEntryRecord, TreeIndex};
use crate::store::refs::RefIndex;

const BLOB_CACHE_SIZE: u64 = 2048;
const TREE_CACHE_SIZE: u64 = 4096;
const REF_CACHE_SIZE: u64 = 8192;

/// Outcome of an insert attempt. A duplicate insert is a normal result, not an
/// error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Insertion {
    Inserted,
    AlreadyExists,
}

/// A header database for a single chain. All mutations go through a
/// process-wide write lock; refs are the durability boundary.
pub struct HeaderDb {
    db: Arc<DB>,
    chain_id: ChainId,
    genesis_hash: Hash,
    inner: RwLock<Inner>,
}

/// The store pair gated by the surrounding lock: writers are exclusive,
/// readers observe a state consistent with some serial ordering of writes.
struct Inner {
    objects: ObjectStore,
    refs: RefIndex,
}

impl HeaderDb {
    /// Opens the store over the given backend, injecting the genesis header if
    /// it is not present yet. This is the only path that writes a height-0
    /// header.
    pub fn open(db: Arc<DB>, genesis: BlockHeader) -> ChainDbResult<Self> {
        if genesis.height != 0 {
            return Err(ChainDbError::InvalidGenesis(genesis.hash));
        }
        let inner = Inner {
            objects: ObjectStore::new(Arc::clone(&db), BLOB_CACHE_SIZE, TREE_CACHE_SIZE),
            refs: RefIndex::new(Arc::clone(&db), REF_CACHE_SIZE),
        };
        let this = Self { db, chain_id: genesis.chain_id, genesis_hash: genesis.hash, inner: RwLock::new(inner) };
        this.init_genesis(genesis)?;
        Ok(this)
    }

    fn init_genesis(&self, genesis: BlockHeader) -> ChainDbResult<()> {
        let inner = self.inner.write();
        let key = RefName::header(0, genesis.hash);
        if inner.refs.has(&key)? {
            debug!("chain {}: genesis {} already present", self.chain_id, genesis.hash);
            return Ok(());
        }
        info!("chain {}: initializing with genesis {}", self.chain_id, genesis.hash);
        let mut batch = WriteBatch::default();
        let blob_id = inner.objects.write_blob(BatchDbWriter::new(&mut batch), genesis.encode())?;
        let records = vec![TreeEntryRecord { name: keys::entry_name(0, genesis.hash), object_id: blob_id, mode: EntryMode::Blob }];
        let tree_id = inner.objects.build_tree(BatchDbWriter::new(&mut batch), records)?;
        inner.refs.set(BatchDbWriter::new(&mut batch), key, tree_id, true)?;
        inner.refs.set(BatchDbWriter::new(&mut batch), RefName::leaf(0, genesis.hash), tree_id, true)?;
        self.db.write(batch).map_err(StoreError::from)?;
        Ok(())
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_hash
    }

    /// Inserts a header whose parent is already stored. The new node's tree
    /// object references its spectrum ancestors, its parent, and its own
    /// encoded header blob; the ref flip (new leaf in, parent leaf out) is
    /// committed in one backend batch.
    pub fn insert(&self, header: &BlockHeader) -> ChainDbResult<Insertion> {
        let inner = self.inner.write();
        if header.chain_id != self.chain_id {
            return Err(ChainDbError::ChainMismatch { expected: self.chain_id, got: header.chain_id });
        }
        let key = RefName::header(header.height, header.hash);
        if inner.refs.has(&key)? {
            return Ok(Insertion::AlreadyExists);
        }
        if header.height == 0 {
            return Err(ChainDbError::InvalidGenesis(header.hash));
        }
        let parent_key = RefName::header(header.height - 1, header.parent_hash);
        let parent_tree_id = match inner.refs.lookup(&parent_key) {
            Ok(id) => id,
            Err(StoreError::KeyNotFound(_)) => {
                return Err(ChainDbError::MissingParent { height: header.height, hash: header.hash, parent: header.parent_hash })
            }
            Err(err) => return Err(err.into()),
        };
        let parent_entry = TreeEntry { height: header.height - 1, hash: header.parent_hash, object_id: parent_tree_id };

        // Resolve the spectrum ancestors by descending from the parent node.
        let mut entries = Vec::new();
        for target in spectrum(header.height) {
            entries.push(walk_ancestors(&inner.objects, parent_entry, target)?);
        }
        entries.push(parent_entry);

        let mut batch = WriteBatch::default();
        let blob_id = inner.objects.write_blob(BatchDbWriter::new(&mut batch), header.encode())?;
        let mut records = entries
            .into_iter()
            .map(|entry| TreeEntryRecord {
                name: keys::entry_name(entry.height, entry.hash),
                object_id: entry.object_id,
                mode: EntryMode::Tree,
            })
            .collect_vec();
        records.push(TreeEntryRecord { name: keys::entry_name(header.height, header.hash), object_id: blob_id, mode: EntryMode::Blob });
        let tree_id = inner.objects.build_tree(BatchDbWriter::new(&mut batch), records)?;

        // Flip the refs: the new node is a leaf, its parent no longer is.
        // Overwrites make a crash-retry converge to the same state.
        inner.refs.set(BatchDbWriter::new(&mut batch), key, tree_id, true)?;
        inner.refs.set(BatchDbWriter::new(&mut batch), RefName::leaf(header.height, header.hash), tree_id, true)?;
        let parent_leaf = RefName::leaf(header.height - 1, header.parent_hash);
        if inner.refs.has(&parent_leaf)? {
            inner.refs.delete(BatchDbWriter::new(&mut batch), parent_leaf)?;
        }
        self.db.write(batch).map_err(StoreError::from)?;
        debug!("chain {}: inserted header {} at height {}", self.chain_id, header.hash, header.height);
        Ok(Insertion::Inserted)
    }

    /// The decoded header stored under `(height, hash)`, if any.
    pub fn lookup_by_key(&self, height: u64, hash: Hash) -> ChainDbResult<Option<BlockHeader>> {
        let inner = self.inner.read();
        let tree_id = match inner.refs.lookup(&RefName::header(height, hash)) {
            Ok(id) => id,
            Err(StoreError::KeyNotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let header = read_node_header(&inner.objects, tree_id)?;
        if header.height != height || header.hash != hash {
            return Err(ChainDbError::Corruption {
                op: "lookup_by_key",
                id: tree_id,
                reason: format!("stored header decodes to {} at height {}", header.hash, header.height),
            });
        }
        Ok(Some(header))
    }

    /// Existence probe without decoding the header.
    pub fn contains(&self, height: u64, hash: Hash) -> ChainDbResult<bool> {
        Ok(self.inner.read().refs.has(&RefName::header(height, hash))?)
    }

    /// Pointer to a stored node, usable as the start of an ancestor walk.
    pub fn self_entry(&self, height: u64, hash: Hash) -> ChainDbResult<Option<TreeEntry>> {
        let inner = self.inner.read();
        match inner.refs.lookup(&RefName::header(height, hash)) {
            Ok(id) => Ok(Some(TreeEntry { height, hash, object_id: id })),
            Err(StoreError::KeyNotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Height-indexed ancestor lookup along the branch of `start`, in O(log h)
    /// tree reads.
    pub fn ancestor_at(&self, start: TreeEntry, target: u64) -> ChainDbResult<TreeEntry> {
        let inner = self.inner.read();
        walk_ancestors(&inner.objects, start, target)
    }

    /// The parent pointer of a stored node (the second-to-last entry of its
    /// tree object). Fails for genesis, which has no parent entry.
    pub fn parent_entry(&self, tree_id: Hash) -> ChainDbResult<TreeEntry> {
        let inner = self.inner.read();
        node_parent_entry(&inner.objects, tree_id)
    }

    /// Lazily iterates from `start` down to genesis by following parent
    /// entries. The sequence is finite and non-restartable.
    pub fn walk_ancestors(&self, start: TreeEntry) -> AncestorWalk {
        AncestorWalk { objects: self.inner.read().objects.clone(), next: Some(start) }
    }

    /// All current branch tips. Refs with names this store did not produce are
    /// skipped, since external tooling may touch the ref namespace.
    pub fn leaves(&self) -> ChainDbResult<Vec<BlockHeader>> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for (name, tree_id) in inner.refs.list(&keys::namespace_pattern(LEAF_NAMESPACE))? {
            if name.parse(LEAF_NAMESPACE).is_none() {
                warn!("chain {}: skipping malformed leaf ref {}", self.chain_id, name);
                continue;
            }
            out.push(read_node_header(&inner.objects, tree_id)?);
        }
        Ok(out)
    }

    /// Height of the highest stored header, taken over the current leaf set.
    /// `None` only for a store without even a genesis leaf.
    pub fn max_rank(&self) -> ChainDbResult<Option<u64>> {
        let inner = self.inner.read();
        Ok(inner
            .refs
            .list(&keys::namespace_pattern(LEAF_NAMESPACE))?
            .iter()
            .filter_map(|(name, _)| name.parse(LEAF_NAMESPACE).map(|(height, _)| height))
            .max())
    }

    /// Streams headers in ascending height from `min_height`, stopping at the
    /// first height with no entries (the end of the chain so far), after
    /// `max_height`, or once `limit` headers were produced. The returned flag
    /// is true when the enumeration was not truncated by the limit.
    pub fn entries_by_rank(&self, min_height: u64, max_height: u64, limit: usize) -> ChainDbResult<(Vec<BlockHeader>, bool)> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        let mut height = min_height;
        while height <= max_height {
            let mut found = inner.refs.list(&keys::rank_pattern(HEADER_NAMESPACE, height))?;
            if found.is_empty() {
                return Ok((out, true));
            }
            found.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, tree_id) in found {
                if out.len() == limit {
                    return Ok((out, false));
                }
                out.push(read_node_header(&inner.objects, tree_id)?);
            }
            match height.checked_add(1) {
                Some(next) => height = next,
                None => break,
            }
        }
        Ok((out, true))
    }

    /// Flushes the backend. The DB handle itself closes when its last
    /// reference drops.
    pub fn close(self) -> ChainDbResult<()> {
        let _exclusive = self.inner.write();
        self.db.flush().map_err(StoreError::from)?;
        Ok(())
    }
}

/// Iterative form of the spectrum descent: at each node pick the entry with
/// the smallest height that is still >= the target, which at least halves the
/// remaining gap per step.
fn walk_ancestors(objects: &ObjectStore, start: TreeEntry, target: u64) -> ChainDbResult<TreeEntry> {
    if target > start.height {
        return Err(ChainDbError::AncestorNotFound(target));
    }
    let mut current = start;
    loop {
        if current.height == target {
            return Ok(current);
        }
        let tree = read_node_tree(objects, current.object_id)?;
        // The last entry is the node's own header blob; the rest are ancestor
        // pointers sorted by height.
        let mut next = None;
        for record in &tree[..tree.len() - 1] {
            let (height, hash) = parse_record_name(record, "walk_ancestors", current.object_id)?;
            if height >= target {
                next = Some(TreeEntry { height, hash, object_id: record.object_id });
                break;
            }
        }
        match next {
            // The strict-descent check keeps corrupt trees from looping us forever
            Some(entry) if entry.height < current.height => current = entry,
            _ => return Err(ChainDbError::AncestorNotFound(target)),
        }
    }
}

/// Reads a tree that is referenced by another object; absence is corruption,
/// not a plain miss.
fn read_node_tree(objects: &ObjectStore, id: Hash) -> ChainDbResult<TreeData> {
    match objects.read_tree(id) {
        Ok(tree) => Ok(tree),
        Err(StoreError::KeyNotFound(_)) => {
            Err(ChainDbError::Corruption { op: "read_node_tree", id, reason: "referenced tree object is missing".to_string() })
        }
        Err(err) => Err(err.into()),
    }
}

/// Decodes the header blob a node's tree object ends with.
fn read_node_header(objects: &ObjectStore, tree_id: Hash) -> ChainDbResult<BlockHeader> {
    let record = match objects.tree_entry_by_index(tree_id, TreeIndex::FromEnd(0)) {
        Ok(record) => record,
        Err(StoreError::KeyNotFound(_)) => {
            return Err(ChainDbError::Corruption {
                op: "read_node_header",
                id: tree_id,
                reason: "referenced tree object is missing".to_string(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    if record.mode != EntryMode::Blob {
        return Err(ChainDbError::Corruption {
            op: "read_node_header",
            id: tree_id,
            reason: "last tree entry is not a header blob".to_string(),
        });
    }
    let blob = match objects.read_blob(record.object_id) {
        Ok(blob) => blob,
        Err(StoreError::KeyNotFound(_)) => {
            return Err(ChainDbError::Corruption {
                op: "read_node_header",
                id: record.object_id,
                reason: "header blob is missing".to_string(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    BlockHeader::decode(&blob)
        .map_err(|err| ChainDbError::Corruption { op: "read_node_header", id: record.object_id, reason: err.to_string() })
}

fn node_parent_entry(objects: &ObjectStore, tree_id: Hash) -> ChainDbResult<TreeEntry> {
    let record = match objects.tree_entry_by_index(tree_id, TreeIndex::FromEnd(1)) {
        Ok(record) => record,
        Err(StoreError::IndexOutOfBounds(..)) => return Err(ChainDbError::ParentNotFound(tree_id)),
        Err(StoreError::KeyNotFound(_)) => {
            return Err(ChainDbError::Corruption {
                op: "parent_entry",
                id: tree_id,
                reason: "referenced tree object is missing".to_string(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    if record.mode != EntryMode::Tree {
        return Err(ChainDbError::Corruption {
            op: "parent_entry",
            id: tree_id,
            reason: "parent entry is not a tree object".to_string(),
        });
    }
    let (height, hash) = parse_record_name(&record, "parent_entry", tree_id)?;
    Ok(TreeEntry { height, hash, object_id: record.object_id })
}

fn parse_record_name(record: &TreeEntryRecord, op: &'static str, id: Hash) -> ChainDbResult<(u64, Hash)> {
    keys::parse_entry_name(&record.name).ok_or_else(|| ChainDbError::Corruption {
        op,
        id,
        reason: format!("malformed tree entry name {:?}", String::from_utf8_lossy(&record.name)),
    })
}

/// Lazy parent-by-parent descent, ending after the genesis entry.
pub struct AncestorWalk {
    objects: ObjectStore,
    next: Option<TreeEntry>,
}

impl Iterator for AncestorWalk {
    type Item = ChainDbResult<TreeEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if current.height > 0 {
            match node_parent_entry(&self.objects, current.object_id) {
                Ok(parent) => self.next = Some(parent),
                Err(err) => return Some(Err(err)),
            }
        }
        Some(Ok(current))
    }
}
