//! RocksDB-backed substrate.
//!
//! A single default column family holds the whole ordered keyspace;
//! structure comes from key prefixes (see [`crate::kv`]). Transactions run
//! on an `OptimisticTransactionDB` with a snapshot taken at begin. Point
//! reads and scans go through that snapshot (plus the transaction's own
//! writes), and a commit that lost a race on any key it read with `get` or
//! wrote fails with [`StoreError::Conflict`] instead of overwriting.
//!
//! Tuning follows the usual LSM read path:
//! - bloom filters for point lookups (document and index probes)
//! - shared LRU block cache
//! - LZ4 block compression

use super::{cancellable, Condition, KvEntry, Result, StoreError, Transaction};
use futures_util::stream::{self, LocalBoxStream};
use rocksdb::{
    BlockBasedOptions, Cache, DBCompressionType, Direction, ErrorKind, IteratorMode,
    OptimisticTransactionDB, OptimisticTransactionOptions, Options, ReadOptions, SingleThreaded,
    WriteOptions,
};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use syncdoc_core::Context;

type Db = OptimisticTransactionDB<SingleThreaded>;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every commit (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Memtable size (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("syncdoc_data"),
            block_cache_size: 256 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        match e.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain => StoreError::Conflict(e.to_string()),
            _ => StoreError::Database(e.to_string()),
        }
    }
}

pub struct RocksStore {
    db: Db,
    config: StoreConfig,
}

impl RocksStore {
    /// Open (or create) the database at `config.path`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_keep_log_file_num(5);
        opts.set_max_total_wal_size(128 * 1024 * 1024);
        opts.increase_parallelism(num_cpus());

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        let db = Db::open(&opts, &config.path)?;
        log::info!("opened store at {}", config.path.display());
        Ok(Self { db, config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn begin(&self) -> RocksTransaction<'_> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        let mut txn_opts = OptimisticTransactionOptions::new();
        txn_opts.set_snapshot(true);
        RocksTransaction {
            txn: self.db.transaction_opt(&write_opts, &txn_opts),
        }
    }
}

pub struct RocksTransaction<'db> {
    txn: rocksdb::Transaction<'db, Db>,
}

impl RocksTransaction<'_> {
    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.txn.rollback()?;
        Ok(())
    }

    /// Read options pinned to the snapshot taken at begin.
    fn snapshot_read_opts(&self) -> ReadOptions {
        let mut opts = ReadOptions::default();
        opts.set_snapshot(&self.txn.snapshot());
        opts
    }
}

impl Transaction for RocksTransaction<'_> {
    async fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.ensure_active()?;
        let opts = self.snapshot_read_opts();
        Ok(self.txn.get_for_update_opt(key, true, &opts)?)
    }

    async fn put(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        ctx.ensure_active()?;
        self.txn.put(key, value)?;
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &[u8]) -> Result<()> {
        ctx.ensure_active()?;
        self.txn.delete(key)?;
        Ok(())
    }

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        condition: Condition<Vec<u8>>,
    ) -> LocalBoxStream<'a, Result<KvEntry>> {
        if condition.is_empty_range() {
            return Box::pin(stream::empty());
        }

        let opts = self.snapshot_read_opts();
        let iter = match &condition.lower {
            Bound::Included(lo) | Bound::Excluded(lo) => self
                .txn
                .iterator_opt(IteratorMode::From(lo.as_slice(), Direction::Forward), opts),
            Bound::Unbounded => self.txn.iterator_opt(IteratorMode::Start, opts),
        };

        let entries = stream::unfold(Some((iter, condition)), |state| async move {
            let (mut iter, condition) = state?;
            loop {
                let (key, value) = match iter.next()? {
                    Ok(kv) => kv,
                    Err(e) => return Some((Err(StoreError::from(e)), None)),
                };
                if condition.is_before_lower(&key) {
                    continue;
                }
                if condition.is_past_upper(&key) {
                    return None;
                }
                let entry = KvEntry {
                    key: key.into_vec(),
                    value: value.into_vec(),
                };
                return Some((Ok(entry), Some((iter, condition))));
            }
        });
        cancellable(ctx, entries)
    }
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
