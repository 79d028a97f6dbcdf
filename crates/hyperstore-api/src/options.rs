//! Database configuration.

use hyperstore_core::{Compression, ReadOptions, WriteOptions};
use hyperstore_storage::sstable::DEFAULT_BLOCK_SIZE;
use hyperstore_storage::{CompactionConfig, SSTableOptions, StorageConfig, DEFAULT_MEMTABLE_SIZE};
use hyperstore_wal::{SyncMode, DEFAULT_SEGMENT_SIZE};
use serde::{Deserialize, Serialize};

/// Options applied when opening a [`Database`](crate::Database)
///
/// # Examples
///
/// ```rust
/// use hyperstore::{Compression, DatabaseOptions, SyncMode};
///
/// let options = DatabaseOptions::default()
///     .with_compression(Compression::Balanced)
///     .with_durability(SyncMode::Async)
///     .with_namespace("embeddings");
/// assert_eq!(options.extra_namespaces, vec!["embeddings".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Create the database when the path holds none
    pub create_if_missing: bool,
    /// Block compression for newly written tables
    pub compression: Compression,
    /// When the WAL is fsynced
    pub durability: SyncMode,
    /// Memtable size that triggers a flush
    pub memtable_size: usize,
    /// WAL segment size before rotation
    pub wal_segment_size: u64,
    /// Compaction thresholds
    pub compaction: CompactionConfig,
    /// Uncompressed data block size
    pub block_size: usize,
    /// Bloom filter density
    pub bloom_bits_per_key: u32,
    /// Fail on unknown namespace ids instead of using the default namespace
    pub strict_namespaces: bool,
    /// Namespaces registered after the well-known ones
    pub extra_namespaces: Vec<String>,
    /// Write options used by `put`, `delete` and `write`
    pub write: WriteOptions,
    /// Read options used by `get`, snapshots and iterators
    pub read: ReadOptions,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        let table = SSTableOptions::default();
        Self {
            create_if_missing: true,
            compression: Compression::None,
            durability: SyncMode::Sync,
            memtable_size: DEFAULT_MEMTABLE_SIZE,
            wal_segment_size: DEFAULT_SEGMENT_SIZE,
            compaction: CompactionConfig::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            bloom_bits_per_key: table.bloom_bits_per_key,
            strict_namespaces: false,
            extra_namespaces: Vec::new(),
            write: WriteOptions::default(),
            read: ReadOptions::default(),
        }
    }
}

impl DatabaseOptions {
    /// Set whether a missing database is created
    pub fn with_create_if_missing(mut self, create_if_missing: bool) -> Self {
        self.create_if_missing = create_if_missing;
        self
    }

    /// Set compression for new tables
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the WAL durability mode
    pub fn with_durability(mut self, durability: SyncMode) -> Self {
        self.durability = durability;
        self
    }

    /// Set the memtable flush threshold
    pub fn with_memtable_size(mut self, bytes: usize) -> Self {
        self.memtable_size = bytes;
        self
    }

    /// Set compaction thresholds
    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    /// Reject unknown namespace ids
    pub fn with_strict_namespaces(mut self, strict: bool) -> Self {
        self.strict_namespaces = strict;
        self
    }

    /// Register an extra namespace
    pub fn with_namespace<S: Into<String>>(mut self, name: S) -> Self {
        self.extra_namespaces.push(name.into());
        self
    }

    /// Set default write options
    pub fn with_write_options(mut self, write: WriteOptions) -> Self {
        self.write = write;
        self
    }

    /// Set default read options
    pub fn with_read_options(mut self, read: ReadOptions) -> Self {
        self.read = read;
        self
    }

    pub(crate) fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            create_if_missing: self.create_if_missing,
            memtable_size: self.memtable_size,
            sync_mode: self.durability,
            max_wal_segment_size: self.wal_segment_size,
            table: SSTableOptions {
                block_size: self.block_size,
                compression: self.compression,
                bloom_bits_per_key: self.bloom_bits_per_key,
            },
            compaction: self.compaction.clone(),
            extra_namespaces: self.extra_namespaces.clone(),
            strict_namespaces: self.strict_namespaces,
        }
    }
}
