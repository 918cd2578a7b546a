//! Ordered key-value store abstraction
//!
//! The core only needs get, ordered range scans and atomic multi-key batches.
//! Two backends:
//!
//! - [`RocksStore`] - RocksDB, for nodes
//! - [`MemoryStore`] - `BTreeMap`, for tests and tooling
//!
//! Every logical operation stages its writes in a [`WriteTxn`]. Reads through
//! the transaction see staged values; nothing reaches the store until
//! [`WriteTxn::commit`] writes one [`StoreBatch`]. Dropping an uncommitted
//! transaction discards it.

use crate::{config::RocksDBConfig, Error, Result};
use parking_lot::RwLock;
use rocksdb::{BlockBasedOptions, DBCompactionStyle, IteratorMode, Options, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

/// Raw key-value pair returned by scans
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Half-open key range `[start, end)`; `end = None` is unbounded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    /// Inclusive lower bound
    pub start: Vec<u8>,
    /// Exclusive upper bound
    pub end: Option<Vec<u8>>,
}

impl ScanRange {
    /// All keys starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: prefix.to_vec(),
            end: prefix_successor(prefix),
        }
    }

    /// Keys in `[start, last]`, where `last` itself is included but keys
    /// extending it are not
    pub fn inclusive(start: Vec<u8>, last: &[u8]) -> Self {
        let mut end = last.to_vec();
        end.push(0x00);
        Self {
            start,
            end: Some(end),
        }
    }

    /// True if `key` falls inside the range
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice()
            && match &self.end {
                Some(end) => key < end.as_slice(),
                None => true,
            }
    }
}

/// Smallest key greater than every key starting with `prefix`
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Scan order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    /// Ascending keys
    #[default]
    Ascending,
    /// Descending keys
    Descending,
}

/// Single write of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair
    Put {
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// Delete a key
    Delete {
        /// Key
        key: Vec<u8>,
    },
}

/// Writes applied all-or-nothing
#[derive(Debug, Clone, Default)]
pub struct StoreBatch {
    ops: Vec<BatchOperation>,
}

impl StoreBatch {
    /// Operations in application order
    pub fn operations(&self) -> &[BatchOperation] {
        &self.ops
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if there is nothing to write
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Durable, ordered key-value store
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Ordered scan of `range`, stopping after `limit` pairs
    fn scan(&self, range: &ScanRange, order: ScanOrder, limit: Option<usize>)
        -> Result<Vec<KvPair>>;

    /// Apply every operation of `batch` atomically
    fn write(&self, batch: StoreBatch) -> Result<()>;

    /// All pairs whose key starts with `prefix`, ascending
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        self.scan(&ScanRange::prefix(prefix), ScanOrder::Ascending, None)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn scan(
        &self,
        range: &ScanRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>> {
        (**self).scan(range, order, limit)
    }

    fn write(&self, batch: StoreBatch) -> Result<()> {
        (**self).write(batch)
    }
}

/// Decode a bincode record
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a bincode record
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Staged writes of one logical operation
pub struct WriteTxn<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a, S: KeyValueStore + ?Sized> WriteTxn<'a, S> {
    /// Start an empty transaction over `store`
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
        }
    }

    /// Read through staged writes
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.get(key),
        }
    }

    /// True if `key` holds a value (staged or committed)
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Stage a put
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    /// Stage an index marker (empty value)
    pub fn put_marker(&mut self, key: Vec<u8>) {
        self.put(key, Vec::new());
    }

    /// Stage a delete
    pub fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Read and decode a record
    pub fn get_record<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        self.get(key)?.map(|bytes| decode(&bytes)).transpose()
    }

    /// Encode and stage a record
    pub fn put_record<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        let bytes = encode(value)?;
        self.put(key, bytes);
        Ok(())
    }

    /// Number of staged writes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write everything as one atomic batch
    pub fn commit(self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let ops = self
            .pending
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOperation::Put { key, value },
                None => BatchOperation::Delete { key },
            })
            .collect();
        self.store.write(StoreBatch { ops })
    }
}

/// In-memory ordered store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn scan(
        &self,
        range: &ScanRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>> {
        let data = self.data.read();
        let upper = match &range.end {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        let iter = data.range((Bound::Included(range.start.clone()), upper));
        let limit = limit.unwrap_or(usize::MAX);
        let pairs = match order {
            ScanOrder::Ascending => iter
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ScanOrder::Descending => iter
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(pairs)
    }

    fn write(&self, batch: StoreBatch) -> Result<()> {
        let mut data = self.data.write();
        for op in batch.ops {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// RocksDB-backed store
pub struct RocksStore {
    db: Arc<DB>,
    sync_writes: bool,
}

impl RocksStore {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>, config: &RocksDBConfig) -> Result<Self> {
        let path = path.as_ref();

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.max_background_jobs);
        db_opts.set_level_zero_file_num_compaction_trigger(
            config.level0_file_num_compaction_trigger,
        );
        db_opts.set_compaction_style(DBCompactionStyle::Level);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // Point lookups on records and counters benefit from bloom filters
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        db_opts.set_block_based_table_factory(&block_opts);

        if config.enable_statistics {
            db_opts.enable_statistics();
        }

        let db = DB::open(&db_opts, path)?;

        tracing::info!(path = ?path, sync_writes = config.sync_writes, "Opened RocksDB");

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.sync_writes,
        })
    }

    /// Approximate number of keys
    pub fn approximate_keys(&self) -> Result<u64> {
        Ok(self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl KeyValueStore for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn scan(
        &self,
        range: &ScanRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut pairs = Vec::new();
        if limit == 0 {
            return Ok(pairs);
        }

        match order {
            ScanOrder::Ascending => {
                let mode = IteratorMode::From(&range.start, rocksdb::Direction::Forward);
                for item in self.db.iterator(mode) {
                    let (key, value) = item?;
                    if !range.contains(&key) {
                        break;
                    }
                    pairs.push((key.to_vec(), value.to_vec()));
                    if pairs.len() == limit {
                        break;
                    }
                }
            }
            ScanOrder::Descending => {
                let mode = match &range.end {
                    Some(end) => IteratorMode::From(end, rocksdb::Direction::Reverse),
                    None => IteratorMode::End,
                };
                for item in self.db.iterator(mode) {
                    let (key, value) = item?;
                    // Reverse seek lands on the last key <= end; end is exclusive
                    if range.end.as_deref().is_some_and(|end| &key[..] >= end) {
                        continue;
                    }
                    if &key[..] < range.start.as_slice() {
                        break;
                    }
                    pairs.push((key.to_vec(), value.to_vec()));
                    if pairs.len() == limit {
                        break;
                    }
                }
            }
        }

        Ok(pairs)
    }

    fn write(&self, batch: StoreBatch) -> Result<()> {
        let mut wb = rocksdb::WriteBatch::default();
        for op in batch.ops {
            match op {
                BatchOperation::Put { key, value } => wb.put(key, value),
                BatchOperation::Delete { key } => wb.delete(key),
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        // Atomic commit
        self.db
            .write_opt(wb, &write_opts)
            .map_err(|e| Error::Storage(format!("batch commit failed: {}", e)))
    }
}
