use crate::{
    db::DB,
    errors::{StoreError, StoreResult},
};

use super::prelude::{Cache, DbKey, DbWriter};
use rocksdb::{Direction, IteratorMode, ReadOptions};
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::hash_map::RandomState, hash::BuildHasher, sync::Arc};

/// Typed access to one prefix bucket of the shared DB: bincode-encoded values
/// behind a write-through, count-bounded cache.
#[derive(Clone)]
pub struct CachedDbAccess<TKey, TData, S = RandomState>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    db: Arc<DB>,
    cache: Cache<TKey, TData, S>,
    prefix: Vec<u8>,
}

type KeyDataResult<TKey, TData> = StoreResult<(TKey, TData)>;

impl<TKey, TData, S> CachedDbAccess<TKey, TData, S>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
    S: BuildHasher + Default,
{
    pub fn new(db: Arc<DB>, cache_size: u64, prefix: Vec<u8>) -> Self {
        Self { db, cache: Cache::new(cache_size), prefix }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn has(&self, key: TKey) -> StoreResult<bool>
    where
        TKey: AsRef<[u8]>,
    {
        if self.cache.contains_key(&key) {
            return Ok(true);
        }
        Ok(self.db.get_pinned(DbKey::new(&self.prefix, key))?.is_some())
    }

    pub fn read(&self, key: TKey) -> StoreResult<TData>
    where
        TKey: AsRef<[u8]>,
        TData: DeserializeOwned,
    {
        if let Some(data) = self.cache.get(&key) {
            return Ok(data);
        }
        let db_key = DbKey::new(&self.prefix, key.clone());
        match self.db.get_pinned(&db_key)? {
            Some(slice) => {
                // The pinned slice lives only for this call, so decode to an owned value
                let data: TData = bincode::deserialize(&slice)?;
                self.cache.insert(key, data.clone());
                Ok(data)
            }
            None => Err(StoreError::KeyNotFound(db_key)),
        }
    }

    /// Iterates the whole bucket in key order.
    pub fn iterator(&self) -> impl Iterator<Item = KeyDataResult<TKey, TData>> + '_
    where
        TKey: AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>,
        TData: DeserializeOwned,
    {
        self.seek_iterator(None, None, usize::MAX, false)
    }

    /// Iterates a sub-bucket (`bucket` bytes appended to the prefix), taking
    /// at most `limit` entries. With `seek_from`, iteration starts at that
    /// key; `skip_first` then drops the seek key itself so a resumed scan
    /// does not yield it twice.
    pub fn seek_iterator(
        &self,
        bucket: Option<&[u8]>,
        seek_from: Option<TKey>,
        limit: usize,
        skip_first: bool,
    ) -> impl Iterator<Item = KeyDataResult<TKey, TData>> + '_
    where
        TKey: AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>,
        TData: DeserializeOwned,
    {
        let mut range_key = DbKey::prefix_only(&self.prefix);
        if let Some(bucket) = bucket {
            range_key.add_bucket(bucket);
        }
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_range(rocksdb::PrefixRange(range_key.as_ref()));

        let mut db_iterator = match seek_from {
            Some(seek_key) => {
                self.db.iterator_opt(IteratorMode::From(DbKey::new(&self.prefix, seek_key).as_ref(), Direction::Forward), read_opts)
            }
            None => self.db.iterator_opt(IteratorMode::Start, read_opts),
        };
        if skip_first {
            db_iterator.next();
        }

        let prefix_len = self.prefix.len();
        db_iterator.take(limit).map(move |item| {
            let (key_bytes, data_bytes) = item?;
            let key = TKey::try_from(&key_bytes[prefix_len..])
                .map_err(|_| StoreError::ConversionError(format!("invalid key bytes in bucket: {key_bytes:?}")))?;
            let data: TData = bincode::deserialize(data_bytes.as_ref())?;
            Ok((key, data))
        })
    }

    /// Writes through the cache. The DB side lands wherever the writer points,
    /// so a batched write is only readable once its batch is committed.
    pub fn write(&self, mut writer: impl DbWriter, key: TKey, data: TData) -> StoreResult<()>
    where
        TKey: AsRef<[u8]>,
        TData: Serialize,
    {
        let bin_data = bincode::serialize(&data)?;
        self.cache.insert(key.clone(), data);
        writer.put(DbKey::new(&self.prefix, key), bin_data)?;
        Ok(())
    }

    pub fn write_many(
        &self,
        mut writer: impl DbWriter,
        iter: &mut (impl Iterator<Item = (TKey, TData)> + Clone),
    ) -> StoreResult<()>
    where
        TKey: AsRef<[u8]>,
        TData: Serialize,
    {
        let iter_clone = iter.clone();
        self.cache.insert_many(iter);
        for (key, data) in iter_clone {
            let bin_data = bincode::serialize(&data)?;
            writer.put(DbKey::new(&self.prefix, key), bin_data)?;
        }
        Ok(())
    }

    pub fn delete(&self, mut writer: impl DbWriter, key: TKey) -> StoreResult<()>
    where
        TKey: AsRef<[u8]>,
    {
        self.cache.remove(&key);
        writer.delete(DbKey::new(&self.prefix, key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        create_temp_db,
        prelude::{BatchDbWriter, ConnBuilder, DirectDbWriter},
    };
    use rocksdb::WriteBatch;
    use weft_hashes::Hash;

    #[test]
    fn test_write_read_roundtrip() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let access = CachedDbAccess::<Hash, u64>::new(db.clone(), 2, vec![1, 2]);

        access.write_many(DirectDbWriter::new(&db), &mut (0..16u64).map(|i| (i.into(), i * 10))).unwrap();
        assert_eq!(16, access.iterator().count());
        assert_eq!(access.read(Hash::from_u64_word(3)).unwrap(), 30);
        assert!(access.has(Hash::from_u64_word(15)).unwrap());
        assert!(!access.has(Hash::from_u64_word(16)).unwrap());
    }

    #[test]
    fn test_batch_visibility() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        // Zero cache size so that reads hit the DB and not the write-through cache
        let access = CachedDbAccess::<Hash, u64>::new(db.clone(), 0, vec![7]);

        let mut batch = WriteBatch::default();
        access.write(BatchDbWriter::new(&mut batch), 1.into(), 42).unwrap();
        assert!(!access.has(1.into()).unwrap());
        db.write(batch).unwrap();
        assert!(access.has(1.into()).unwrap());
        assert_eq!(access.read(1.into()).unwrap(), 42);
    }

    #[test]
    fn test_delete() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let access = CachedDbAccess::<Hash, u64>::new(db.clone(), 4, vec![3]);

        access.write(DirectDbWriter::new(&db), 5.into(), 55).unwrap();
        assert!(access.has(5.into()).unwrap());
        access.delete(DirectDbWriter::new(&db), 5.into()).unwrap();
        assert!(!access.has(5.into()).unwrap());
    }

    #[test]
    fn test_seek_iterator_resume() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let access = CachedDbAccess::<Hash, u64>::new(db.clone(), 0, vec![9]);
        access.write_many(DirectDbWriter::new(&db), &mut (0..8u64).map(|i| (i.into(), i))).unwrap();

        let page: Vec<_> = access.seek_iterator(None, None, 3, false).map(|item| item.unwrap()).collect();
        assert_eq!(page.len(), 3);

        // Resuming from the last key of the previous page, skipping it
        let resumed: Vec<_> = access.seek_iterator(None, Some(page[2].0), usize::MAX, true).map(|item| item.unwrap()).collect();
        assert_eq!(resumed.len(), 5);
        assert!(!resumed.iter().any(|(key, _)| *key == page[2].0));
    }
}
