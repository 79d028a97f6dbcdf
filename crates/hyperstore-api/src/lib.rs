//! # hyperstore
//!
//! An embedded, persistent key-value engine for hypergraph stores.
//!
//! Data lives in named namespaces (nodes, links, incidence lists, attention
//! and truth values, metadata), each an independently ordered key space.
//! Writes go through a write-ahead log into an LSM tree; reads, snapshots and
//! iterators see a consistent, multi-version state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hyperstore::{Compression, Database, NamespaceId};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("./atomspace", true, Compression::None)?;
//!
//!     db.put(NamespaceId::NODES, b"node:42", b"ConceptNode cat")?;
//!     if let Some(node) = db.get(NamespaceId::NODES, b"node:42")? {
//!         println!("{}", String::from_utf8_lossy(&node));
//!     }
//!
//!     db.delete(NamespaceId::NODES, b"node:42")?;
//!     db.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Batches, Snapshots and Iterators
//!
//! ```rust,no_run
//! use hyperstore::{Database, DatabaseOptions, NamespaceId, WriteBatch};
//!
//! let db = Database::open_with_options("./atomspace", DatabaseOptions::default())?;
//!
//! let mut batch = WriteBatch::new();
//! batch.put_in(NamespaceId::LINKS, b"link:1", b"InheritanceLink");
//! batch.put_in(NamespaceId::INCOMING, b"node:42", b"link:1");
//! db.write(&batch)?;
//!
//! let snapshot = db.snapshot()?;
//! db.delete(NamespaceId::LINKS, b"link:1")?;
//! assert!(snapshot.get(NamespaceId::LINKS, b"link:1")?.is_some());
//!
//! let mut iter = snapshot.iter(NamespaceId::LINKS)?;
//! iter.seek_to_first()?;
//! assert_eq!(iter.key()?, b"link:1");
//! # Ok::<(), hyperstore::Error>(())
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub mod batch;
pub mod iterator;
pub mod logging;
pub mod options;
pub mod snapshot;

pub use batch::WriteBatch;
pub use iterator::DbIterator;
pub use options::DatabaseOptions;
pub use snapshot::Snapshot;

// Re-export core types
pub use hyperstore_core::{
    Compression, Error, NamespaceId, ReadOptions, Result, SequenceNumber, WriteOp, WriteOptions,
    MAX_NAMESPACES, WELL_KNOWN_NAMESPACES,
};

// Engine configuration and statistics
pub use hyperstore_storage::{CompactionConfig, CompactionStats, StorageStats};
pub use hyperstore_wal::SyncMode;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) struct DatabaseInner {
    path: PathBuf,
    pub(crate) options: DatabaseOptions,
    pub(crate) engine: hyperstore_storage::StorageEngine,
}

impl fmt::Debug for DatabaseInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &!self.engine.is_closed())
            .finish()
    }
}

/// The main database handle.
///
/// Thread-safe and cheap to clone; clones share one engine. The database is
/// closed by [`Database::close`] or when the last clone is dropped. Every
/// operation on a closed handle fails with [`Error::NotOpen`].
///
/// Namespace ids outside the registered range select the default namespace,
/// unless [`DatabaseOptions::strict_namespaces`] is set.
///
/// # Examples
///
/// ```rust,no_run
/// use hyperstore::{Database, NamespaceId};
///
/// let db = Database::open("./my_data", true, Default::default())?;
/// db.put(NamespaceId::DEFAULT, b"key", b"value")?;
///
/// // Data persists across restarts
/// db.close()?;
/// let db = Database::open("./my_data", false, Default::default())?;
/// assert_eq!(db.get(NamespaceId::DEFAULT, b"key")?, Some(b"value".to_vec()));
/// # Ok::<(), hyperstore::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens the database at `path`.
    ///
    /// An existing database is opened with its persisted namespaces. A
    /// missing one is created with the well-known namespaces when
    /// `create_if_missing` is set, otherwise this fails with
    /// [`Error::Config`]. `compression` applies to tables written from now
    /// on; tables already on disk stay readable whatever it is.
    ///
    /// Fails with [`Error::Locked`] while another handle has the path open.
    pub fn open<P: AsRef<Path>>(
        path: P,
        create_if_missing: bool,
        compression: Compression,
    ) -> Result<Self> {
        let options = DatabaseOptions::default()
            .with_create_if_missing(create_if_missing)
            .with_compression(compression);
        Self::open_with_options(path, options)
    }

    /// Opens the database at `path` with full options.
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: DatabaseOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let engine = hyperstore_storage::StorageEngine::open(&path, options.storage_config())?;
        Ok(Database {
            inner: Arc::new(DatabaseInner {
                path,
                options,
                engine,
            }),
        })
    }

    /// Inserts or overwrites `key` in `namespace`.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hyperstore::{Database, NamespaceId};
    ///
    /// let db = Database::open("./data", true, Default::default())?;
    /// db.put(NamespaceId::NODES, b"name", b"Alice")?;
    /// db.put(NamespaceId::NODES, b"name", b"Bob")?; // Updates the value
    /// # Ok::<(), hyperstore::Error>(())
    /// ```
    pub fn put(&self, namespace: NamespaceId, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_opt(namespace, key, value, &self.inner.options.write)
    }

    /// [`Database::put`] with explicit write options.
    pub fn put_opt(
        &self,
        namespace: NamespaceId,
        key: &[u8],
        value: &[u8],
        options: &WriteOptions,
    ) -> Result<()> {
        let op = WriteOp::Put {
            namespace,
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.inner.engine.write(vec![op], *options).map(|_| ())
    }

    /// Retrieves the value of `key` in `namespace`.
    ///
    /// Returns `None` if the key doesn't exist. An empty value is a present
    /// value.
    pub fn get(&self, namespace: NamespaceId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_opt(namespace, key, &self.inner.options.read)
    }

    /// [`Database::get`] with explicit read options.
    pub fn get_opt(
        &self,
        namespace: NamespaceId,
        key: &[u8],
        options: &ReadOptions,
    ) -> Result<Option<Vec<u8>>> {
        self.inner.engine.get(namespace, key, options, None)
    }

    /// Removes `key` from `namespace`. Deleting an absent key succeeds.
    pub fn delete(&self, namespace: NamespaceId, key: &[u8]) -> Result<()> {
        self.delete_opt(namespace, key, &self.inner.options.write)
    }

    /// [`Database::delete`] with explicit write options.
    pub fn delete_opt(&self, namespace: NamespaceId, key: &[u8], options: &WriteOptions) -> Result<()> {
        let op = WriteOp::Delete {
            namespace,
            key: key.to_vec(),
        };
        self.inner.engine.write(vec![op], *options).map(|_| ())
    }

    /// Whether `key` is present in `namespace`.
    ///
    /// Lookup failures other than [`Error::NotOpen`] are reported as absent.
    pub fn exists(&self, namespace: NamespaceId, key: &[u8]) -> Result<bool> {
        match self.get(namespace, key) {
            Ok(value) => Ok(value.is_some()),
            Err(Error::NotOpen) => Err(Error::NotOpen),
            Err(e) => {
                debug!(error = %e, "lookup failed, reporting key as absent");
                Ok(false)
            }
        }
    }

    /// Commits every operation in `batch` atomically.
    ///
    /// Returns the batch's sequence number. Either all operations become
    /// visible together or, on error, none do.
    ///
    /// # Blocking
    ///
    /// A write that fills the memtable flushes it to an SSTable, and runs
    /// any compaction that flush makes due, on the calling thread before
    /// returning. Other writers wait for the commit but not for the flush.
    /// The same holds for [`Database::put`] and [`Database::delete`].
    pub fn write(&self, batch: &WriteBatch) -> Result<SequenceNumber> {
        self.write_opt(batch, &self.inner.options.write)
    }

    /// [`Database::write`] with explicit write options.
    pub fn write_opt(&self, batch: &WriteBatch, options: &WriteOptions) -> Result<SequenceNumber> {
        self.inner.engine.write(batch.ops().to_vec(), *options)
    }

    /// Captures the current committed state.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let sequence = self.inner.engine.acquire_snapshot()?;
        Ok(Snapshot::new(Arc::downgrade(&self.inner), sequence))
    }

    /// Iterator over `namespace` reading the latest committed state.
    pub fn iter(&self, namespace: NamespaceId) -> Result<DbIterator> {
        DbIterator::new(&self.inner, namespace, None)
    }

    /// Writes all buffered data to SSTables and makes the manifest durable.
    pub fn flush(&self) -> Result<()> {
        self.inner.engine.flush()
    }

    /// fsyncs the write-ahead log.
    pub fn sync_wal(&self) -> Result<()> {
        self.inner.engine.sync_wal()
    }

    /// Flushes and merges every table of `namespace`.
    ///
    /// Changes only the on-disk layout, never the logical contents.
    pub fn compact_range(&self, namespace: NamespaceId) -> Result<()> {
        self.inner.engine.compact_range(namespace)
    }

    /// Value of an engine property such as `hyperstore.estimate-num-keys`.
    ///
    /// Unknown names yield `None`.
    pub fn property(&self, name: &str) -> Result<Option<String>> {
        self.inner.engine.property(name)
    }

    /// Structured engine statistics.
    pub fn stats(&self) -> Result<StorageStats> {
        self.inner.engine.stats()
    }

    /// Id registered for the namespace `name`.
    pub fn namespace_id(&self, name: &str) -> Option<NamespaceId> {
        self.inner.engine.namespace_id(name)
    }

    /// Registered namespace names, in id order.
    pub fn namespaces(&self) -> Result<Vec<String>> {
        if self.inner.engine.is_closed() {
            return Err(Error::NotOpen);
        }
        Ok(self.inner.engine.namespaces())
    }

    /// Database directory.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Options the database was opened with.
    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    /// Closes the database for every clone of this handle.
    ///
    /// Syncs the WAL and releases the directory lock. Closing twice is a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        self.inner.engine.close()
    }

    /// Whether the database accepts operations.
    pub fn is_open(&self) -> bool {
        !self.inner.engine.is_closed()
    }
}
