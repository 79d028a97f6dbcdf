//! # hyperstore Storage Engine
//!
//! LSM-tree based persistent storage engine for hyperstore.
//!
//! ## Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of hyperstore.**
//! Users should depend on the `hyperstore` crate instead, which provides the
//! stable public API.
//!
//! ---
//!
//! This crate implements a namespaced, multi-version LSM tree:
//!
//! - **Memtable**: In-memory write buffer, one sorted map per namespace
//! - **SSTable**: Immutable on-disk tables with compressed blocks and bloom filters
//! - **Compaction**: Merges level-0 tables into level 1, honouring live snapshots
//! - **Manifest**: Atomically rewritten record of live tables and namespaces
//! - **WAL**: Every committed batch is logged before it becomes visible
//!
//! ## Architecture
//!
//! ```text
//! Writes → WAL → Memtable (memory) → Level 0 (disk) → Level 1 (disk)
//!                     ↓                    ↓
//!              Flush when full     Compact at trigger
//! ```
//!
//! Every committed batch gets one global sequence number. Reads pick the
//! newest version at or below their read sequence, which is either the
//! latest committed sequence or one pinned by a snapshot.

use hyperstore_core::{
    Error, NamespaceId, NamespaceRegistry, ReadOptions, Result, SequenceNumber, WriteOp,
    WriteOptions, WELL_KNOWN_NAMESPACES,
};
use hyperstore_snapshot::SnapshotList;
use hyperstore_wal::{RecordPayload, SegmentManager, SyncMode, WalConfig, WalManager, WalRecord};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

pub mod bloom;
pub mod compaction;
pub mod compression;
pub mod lock;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod view;

pub use compaction::{CompactionConfig, CompactionStats, CompactionWorker};
pub use lock::DirLock;
pub use manifest::{Manifest, ManifestEdit, ManifestSSTable};
pub use memtable::{Memtable, MemtableEntry};
pub use sstable::{SSTableEntry, SSTableMeta, SSTableOptions, SSTableReader, SSTableWriter};
pub use view::{ReadView, Seek};

use compaction::CompactionJob;
use view::{FrozenMemtable, Table};

/// Default memtable flush threshold (4MB)
pub const DEFAULT_MEMTABLE_SIZE: usize = 4 * 1024 * 1024;

/// Prefix shared by every property name
pub const PROPERTY_PREFIX: &str = "hyperstore.";

/// Subdirectory holding SSTables
const TABLE_DIR: &str = "sst";
/// Subdirectory holding WAL segments
const WAL_DIR: &str = "wal";

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Create the database when the directory holds none
    pub create_if_missing: bool,
    /// Memtable size that triggers a flush
    pub memtable_size: usize,
    /// Sync mode for WAL
    pub sync_mode: SyncMode,
    /// WAL segment size before rotation
    pub max_wal_segment_size: u64,
    /// Block size, compression and bloom density for new tables
    pub table: SSTableOptions,
    /// Compaction configuration
    pub compaction: CompactionConfig,
    /// Namespaces to register beyond the well-known ones
    pub extra_namespaces: Vec<String>,
    /// Reject unknown namespace ids instead of using the default namespace
    pub strict_namespaces: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            memtable_size: DEFAULT_MEMTABLE_SIZE,
            sync_mode: SyncMode::Sync,
            max_wal_segment_size: WalConfig::default().max_segment_size,
            table: SSTableOptions::default(),
            compaction: CompactionConfig::default(),
            extra_namespaces: Vec::new(),
            strict_namespaces: false,
        }
    }
}

/// Serialized part of the write path
struct WriteState {
    wal: WalManager,
    last_sequence: SequenceNumber,
}

/// Storage engine manager
///
/// Provides persistent, namespaced, multi-version key-value storage using an
/// LSM-tree. All methods take `&self` and are safe to call from many threads.
pub struct StorageEngine {
    /// Database directory
    dir: PathBuf,
    /// SSTable directory
    table_dir: PathBuf,
    /// WAL directory
    wal_dir: PathBuf,
    /// Configuration
    config: StorageConfig,
    /// Namespace names, fixed for the lifetime of the handle
    registry: NamespaceRegistry,
    /// WAL and sequence allocation; held for the whole commit
    write: Mutex<WriteState>,
    /// Highest sequence whose batch is fully applied
    visible_sequence: AtomicU64,
    /// Current read view
    view: RwLock<Arc<ReadView>>,
    /// Manifest
    manifest: Mutex<Manifest>,
    /// Serializes flushes
    flush_lock: Mutex<()>,
    /// Compaction worker; holding it serializes compactions
    compactor: Mutex<CompactionWorker>,
    /// Copy of the worker's statistics, readable during a compaction
    compaction_stats: Mutex<CompactionStats>,
    /// Live snapshots
    snapshots: SnapshotList,
    /// Set once by close
    closed: AtomicBool,
    /// Directory lock, released on close
    dir_lock: Mutex<Option<DirLock>>,
}

impl fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEngine")
            .field("dir", &self.dir)
            .field("closed", &self.is_closed())
            .field("sequence", &self.latest_sequence())
            .finish()
    }
}

impl StorageEngine {
    /// Open or create a storage engine at the given path
    pub fn open(path: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        prepare_dir(&dir, config.create_if_missing)?;
        let dir_lock = DirLock::acquire(&dir)?;

        let table_dir = dir.join(TABLE_DIR);
        let wal_dir = dir.join(WAL_DIR);
        fs::create_dir_all(&table_dir)?;
        fs::create_dir_all(&wal_dir)?;

        // Open manifest
        let mut manifest = if Manifest::exists(&dir) {
            Manifest::load(&dir)?
        } else {
            info!(path = %dir.display(), "creating new database");
            Manifest::create(&dir, NamespaceRegistry::well_known().names().to_vec())?
        };

        // Register namespaces
        let mut registry = NamespaceRegistry::from_names(manifest.namespaces().to_vec())?;
        let mut registered = false;
        let wanted = WELL_KNOWN_NAMESPACES
            .iter()
            .copied()
            .chain(config.extra_namespaces.iter().map(String::as_str));
        for name in wanted {
            registered |= registry.ensure(name)?.1;
        }
        if registered {
            manifest.apply(ManifestEdit {
                namespaces: Some(registry.names().to_vec()),
                ..Default::default()
            })?;
        }
        let registry = registry.with_strict(config.strict_namespaces);

        // Open tables
        let tables = open_tables(&manifest, &table_dir)?;
        remove_orphan_tables(&table_dir, &manifest)?;

        // Replay the WAL on top of the persisted state
        let mut wal = WalManager::new(WalConfig {
            sync_mode: config.sync_mode,
            max_segment_size: config.max_wal_segment_size,
            wal_dir: wal_dir.clone(),
        })?;
        let recovered = wal.recover(manifest.last_sequence())?;
        let view = ReadView::new(tables);
        {
            let mut memtable = view.active.write().map_err(|_| Error::LockPoisoned)?;
            for batch in &recovered.batches {
                memtable.apply(batch.sequence, &batch.ops);
            }
        }
        let last_sequence = manifest.last_sequence().max(recovered.last_sequence);
        wal.open()?;
        let fresh_segment = wal.current_segment();

        let engine = Self {
            dir,
            table_dir,
            wal_dir,
            registry,
            write: Mutex::new(WriteState { wal, last_sequence }),
            visible_sequence: AtomicU64::new(last_sequence),
            view: RwLock::new(Arc::new(view)),
            manifest: Mutex::new(manifest),
            flush_lock: Mutex::new(()),
            compactor: Mutex::new(CompactionWorker::new(
                config.compaction.clone(),
                config.table,
            )),
            compaction_stats: Mutex::new(CompactionStats::default()),
            snapshots: SnapshotList::new(),
            closed: AtomicBool::new(false),
            dir_lock: Mutex::new(Some(dir_lock)),
            config,
        };

        if !recovered.batches.is_empty() {
            // Persist replayed batches so the old segments can go
            engine.flush_memtables(true)?;
        } else if let Some(current) = fresh_segment {
            SegmentManager::new(engine.wal_dir.clone()).cleanup_before(current)?;
        }

        info!(
            path = %engine.dir.display(),
            sequence = last_sequence,
            replayed = recovered.batches.len(),
            namespaces = engine.registry.len(),
            "database opened"
        );

        Ok(engine)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    fn current_view(&self) -> Result<Arc<ReadView>> {
        let view = self.view.read().map_err(|_| Error::LockPoisoned)?;
        Ok(Arc::clone(&view))
    }

    fn next_table_path(&self) -> Result<PathBuf> {
        let number = self
            .manifest
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .allocate_file_number();
        Ok(self.table_dir.join(format!("{:06}.sst", number)))
    }

    /// Commit `ops` atomically under one new sequence number
    ///
    /// Returns the batch's sequence. An empty batch commits nothing and
    /// returns the latest sequence. When the batch fills the active
    /// memtable, the flush and any compaction it triggers run on the
    /// caller's thread after the write lock is released.
    pub fn write(&self, ops: Vec<WriteOp>, options: WriteOptions) -> Result<SequenceNumber> {
        self.ensure_open()?;
        if ops.is_empty() {
            return Ok(self.latest_sequence());
        }

        let ops = ops
            .into_iter()
            .map(|op| {
                let namespace = self.registry.resolve(op.namespace())?;
                Ok(op.with_namespace(namespace))
            })
            .collect::<Result<Vec<_>>>()?;

        let (sequence, needs_flush) = {
            let mut state = self.write.lock().map_err(|_| Error::LockPoisoned)?;
            self.ensure_open()?;

            let sequence = state.last_sequence + 1;
            let record = WalRecord::batch(sequence, ops);
            // On failure the WAL has dropped the frame or refuses all later
            // appends, so `sequence` is never logged twice
            state.wal.append(&record, options.sync)?;

            let view = self.current_view()?;
            let needs_flush = {
                let mut memtable = view.active.write().map_err(|_| Error::LockPoisoned)?;
                if let RecordPayload::Batch { ops, .. } = &record.payload {
                    memtable.apply(sequence, ops);
                }
                memtable.size_bytes() >= self.config.memtable_size
            };

            state.last_sequence = sequence;
            self.visible_sequence.store(sequence, Ordering::Release);
            (sequence, needs_flush)
        };

        if needs_flush {
            // The batch is durable in the WAL; a failed flush is retried later
            if let Err(e) = self.flush_memtables(false).and_then(|_| self.maybe_compact()) {
                warn!(error = %e, "background flush failed");
            }
        }

        Ok(sequence)
    }

    /// Newest live value of `key`, at `snapshot` or the latest sequence
    pub fn get(
        &self,
        namespace: NamespaceId,
        key: &[u8],
        options: &ReadOptions,
        snapshot: Option<SequenceNumber>,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let namespace = self.registry.resolve(namespace)?;
        // View first: it then holds every version at or below the sequence
        let view = self.current_view()?;
        let sequence = snapshot.unwrap_or_else(|| self.latest_sequence());
        view.get(namespace, key, sequence, options.verify_checksums)
    }

    /// First live entry in the direction of `seek`
    pub fn seek(
        &self,
        namespace: NamespaceId,
        seek: Seek<'_>,
        options: &ReadOptions,
        snapshot: Option<SequenceNumber>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let namespace = self.registry.resolve(namespace)?;
        let view = self.current_view()?;
        let sequence = snapshot.unwrap_or_else(|| self.latest_sequence());
        view.seek(namespace, seek, sequence, options.verify_checksums)
    }

    /// Persist all memtables to SSTables and run due compactions
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.flush_memtables(true)?;
        self.maybe_compact()
    }

    /// fsync the WAL
    pub fn sync_wal(&self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.write.lock().map_err(|_| Error::LockPoisoned)?;
        state.wal.sync()
    }

    /// Flush, then merge every table of `namespace` into level 1
    pub fn compact_range(&self, namespace: NamespaceId) -> Result<()> {
        self.ensure_open()?;
        let namespace = self.registry.resolve(namespace)?;
        self.flush_memtables(true)?;
        self.compact_namespace(namespace, true)
    }

    /// Freeze the active memtable and write every frozen memtable to level 0
    ///
    /// Without `force`, the active memtable is only frozen once it is full.
    fn flush_memtables(&self, force: bool) -> Result<()> {
        let _flush = self.flush_lock.lock().map_err(|_| Error::LockPoisoned)?;
        self.ensure_open()?;
        self.freeze_active(force)?;

        // Oldest first, so the manifest sequence only covers persisted data
        loop {
            let oldest = self.current_view()?.frozen.last().cloned();
            let Some(frozen) = oldest else {
                break;
            };
            self.write_level0(&frozen)?;
        }

        Ok(())
    }

    fn freeze_active(&self, force: bool) -> Result<()> {
        let mut state = self.write.lock().map_err(|_| Error::LockPoisoned)?;
        let mut current = self.view.write().map_err(|_| Error::LockPoisoned)?;

        let (empty, size) = {
            let memtable = current.active.read().map_err(|_| Error::LockPoisoned)?;
            (memtable.is_empty(), memtable.size_bytes())
        };
        if empty || (!force && size < self.config.memtable_size) {
            return Ok(());
        }

        let wal_boundary = state.wal.rotate()?;
        let mut next = ReadView::clone(&current);
        next.frozen.insert(
            0,
            Arc::new(FrozenMemtable {
                memtable: Arc::clone(&next.active),
                last_sequence: state.last_sequence,
                wal_boundary,
            }),
        );
        next.active = Arc::new(RwLock::new(Memtable::new()));
        *current = Arc::new(next);

        debug!(
            sequence = state.last_sequence,
            size, wal_boundary, "memtable frozen"
        );
        Ok(())
    }

    fn write_level0(&self, frozen: &Arc<FrozenMemtable>) -> Result<()> {
        let mut tables = Vec::new();
        {
            let memtable = frozen.memtable.read().map_err(|_| Error::LockPoisoned)?;
            for namespace in memtable.namespaces() {
                let path = self.next_table_path()?;
                let mut writer = SSTableWriter::new(&path, namespace, self.config.table)?;
                for (vk, entry) in memtable.iter(namespace) {
                    writer.add(SSTableEntry::from_memtable(
                        vk.key.clone(),
                        vk.sequence.0,
                        entry.clone(),
                    ))?;
                }
                let meta = writer.finish()?;
                let reader = Arc::new(SSTableReader::open(&meta.path)?);
                tables.push(Arc::new(Table { meta, reader }));
            }
        }

        {
            let mut manifest = self.manifest.lock().map_err(|_| Error::LockPoisoned)?;
            manifest.apply(ManifestEdit {
                added: tables
                    .iter()
                    .map(|t| ManifestSSTable::from_meta(&t.meta))
                    .collect(),
                last_sequence: Some(frozen.last_sequence),
                ..Default::default()
            })?;
        }

        {
            let mut current = self.view.write().map_err(|_| Error::LockPoisoned)?;
            let mut next = ReadView::clone(&current);
            next.frozen.retain(|f| !Arc::ptr_eq(f, frozen));
            for table in &tables {
                next.tables
                    .entry(table.meta.namespace)
                    .or_default()
                    .push_level0(Arc::clone(table));
            }
            *current = Arc::new(next);
        }

        let removed = {
            let mut state = self.write.lock().map_err(|_| Error::LockPoisoned)?;
            state
                .wal
                .checkpoint(frozen.last_sequence, frozen.wal_boundary)?
        };

        info!(
            sequence = frozen.last_sequence,
            tables = tables.len(),
            wal_segments_removed = removed,
            "memtable flushed"
        );
        Ok(())
    }

    fn maybe_compact(&self) -> Result<()> {
        let trigger = self.config.compaction.level0_trigger.max(1);
        let due: Vec<NamespaceId> = self
            .current_view()?
            .tables
            .iter()
            .filter(|(_, t)| t.level0.len() >= trigger)
            .map(|(ns, _)| *ns)
            .collect();

        for namespace in due {
            self.compact_namespace(namespace, false)?;
        }
        Ok(())
    }

    /// Merge level 0 (and overlapping level 1) of `namespace` into level 1
    ///
    /// With `full`, every table of the namespace takes part.
    fn compact_namespace(&self, namespace: NamespaceId, full: bool) -> Result<()> {
        let mut worker = self.compactor.lock().map_err(|_| Error::LockPoisoned)?;
        self.ensure_open()?;

        let view = self.current_view()?;
        let Some(tables) = view.namespace_tables(namespace) else {
            return Ok(());
        };

        let inputs: Vec<Arc<Table>> = if full {
            tables.iter().cloned().collect()
        } else {
            if !worker.needs_compaction(tables.level0.len()) {
                return Ok(());
            }
            let min_key = tables.level0.iter().map(|t| &t.meta.min_key).min();
            let max_key = tables.level0.iter().map(|t| &t.meta.max_key).max();
            let (Some(min_key), Some(max_key)) = (min_key, max_key) else {
                return Ok(());
            };
            tables
                .level0
                .iter()
                .chain(
                    tables
                        .level1
                        .iter()
                        .filter(|t| t.meta.max_key >= *min_key && t.meta.min_key <= *max_key),
                )
                .cloned()
                .collect()
        };
        if inputs.is_empty() {
            return Ok(());
        }

        let job = CompactionJob {
            namespace,
            inputs: inputs.iter().map(|t| Arc::clone(&t.reader)).collect(),
            smallest_snapshot: self.snapshots.oldest_or(|| self.latest_sequence())?,
        };
        let output = worker.run(&job, &mut || self.next_table_path())?;
        *self
            .compaction_stats
            .lock()
            .map_err(|_| Error::LockPoisoned)? = worker.stats().clone();

        let mut outputs = Vec::with_capacity(output.outputs.len());
        for meta in output.outputs {
            let reader = Arc::new(SSTableReader::open(&meta.path)?);
            outputs.push(Arc::new(Table { meta, reader }));
        }
        let removed: Vec<String> = inputs.iter().map(|t| t.file_name()).collect();

        {
            let mut manifest = self.manifest.lock().map_err(|_| Error::LockPoisoned)?;
            manifest.apply(ManifestEdit {
                added: outputs
                    .iter()
                    .map(|t| ManifestSSTable::from_meta(&t.meta))
                    .collect(),
                removed: removed.clone(),
                compaction: true,
                ..Default::default()
            })?;
        }

        {
            let mut current = self.view.write().map_err(|_| Error::LockPoisoned)?;
            let mut next = ReadView::clone(&current);
            let ns_tables = next.tables.entry(namespace).or_default();
            ns_tables.remove(&removed);
            for table in &outputs {
                ns_tables.push_level1(Arc::clone(table));
            }
            *current = Arc::new(next);
        }

        // Readers on older views keep their open handles
        for table in &inputs {
            if let Err(e) = sstable::delete_sstable(&table.meta.path) {
                warn!(path = %table.meta.path.display(), error = %e, "failed to delete compacted table");
            }
        }

        Ok(())
    }

    /// Pin the latest sequence for a snapshot
    pub fn acquire_snapshot(&self) -> Result<SequenceNumber> {
        self.ensure_open()?;
        self.snapshots.acquire(|| self.latest_sequence())
    }

    /// Unpin a snapshot sequence
    ///
    /// Allowed after close so that snapshots can always be released.
    pub fn release_snapshot(&self, sequence: SequenceNumber) -> Result<bool> {
        self.snapshots.release(sequence)
    }

    /// Latest committed and visible sequence
    pub fn latest_sequence(&self) -> SequenceNumber {
        self.visible_sequence.load(Ordering::Acquire)
    }

    /// Map a caller-supplied namespace id onto a registered one
    pub fn resolve_namespace(&self, namespace: NamespaceId) -> Result<NamespaceId> {
        self.registry.resolve(namespace)
    }

    /// Id registered for `name`
    pub fn namespace_id(&self, name: &str) -> Option<NamespaceId> {
        self.registry.id_of(name)
    }

    /// Registered namespace names in id order
    pub fn namespaces(&self) -> Vec<String> {
        self.registry.names().to_vec()
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Structured statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.ensure_open()?;
        let view = self.current_view()?;

        let mut memtable_bytes = 0;
        let mut memtable_entries = 0;
        {
            let active = view.active.read().map_err(|_| Error::LockPoisoned)?;
            memtable_bytes += active.size_bytes();
            memtable_entries += active.len();
        }
        for frozen in &view.frozen {
            let memtable = frozen.memtable.read().map_err(|_| Error::LockPoisoned)?;
            memtable_bytes += memtable.size_bytes();
            memtable_entries += memtable.len();
        }

        let compaction_count = self
            .manifest
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .compaction_count();
        let compaction = self
            .compaction_stats
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .clone();

        Ok(StorageStats {
            latest_sequence: self.latest_sequence(),
            memtable_bytes,
            memtable_entries,
            immutable_memtables: view.frozen.len(),
            level_files: vec![view.files_at_level(0), view.files_at_level(1)],
            total_sst_bytes: view.total_table_bytes(),
            estimated_keys: view.estimated_entries()?,
            snapshots: self.snapshots.len()?,
            oldest_snapshot: self.snapshots.oldest()?,
            compaction_count,
            compaction,
            namespaces: self.registry.len(),
            wal_segments: SegmentManager::new(self.wal_dir.clone()).segment_count()?,
        })
    }

    /// Value of a named property, `None` for unknown names
    pub fn property(&self, name: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        let Some(property) = name.strip_prefix(PROPERTY_PREFIX) else {
            return Ok(None);
        };
        let stats = self.stats()?;

        let value = match property {
            "estimate-num-keys" => stats.estimated_keys.to_string(),
            "cur-size-all-mem-tables" => stats.memtable_bytes.to_string(),
            "num-immutable-mem-table" => stats.immutable_memtables.to_string(),
            "total-sst-files-size" => stats.total_sst_bytes.to_string(),
            "num-snapshots" => stats.snapshots.to_string(),
            "oldest-snapshot-sequence" => stats.oldest_snapshot.unwrap_or(0).to_string(),
            "latest-sequence-number" => stats.latest_sequence.to_string(),
            "compaction-count" => stats.compaction_count.to_string(),
            "num-namespaces" => stats.namespaces.to_string(),
            "stats" => stats.to_string(),
            other => {
                let level = other
                    .strip_prefix("num-files-at-level")
                    .and_then(|level| level.parse::<usize>().ok());
                match level {
                    Some(level) => stats.level_files.get(level).copied().unwrap_or(0).to_string(),
                    None => return Ok(None),
                }
            }
        };

        Ok(Some(value))
    }

    /// Sync the WAL, stop accepting operations and release the directory lock
    ///
    /// Idempotent. Unflushed memtables are recovered from the WAL on the
    /// next open.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Wait for in-flight flushes and compactions
        let _flush = self.flush_lock.lock().map_err(|_| Error::LockPoisoned)?;
        let _compactor = self.compactor.lock().map_err(|_| Error::LockPoisoned)?;

        let result = self
            .write
            .lock()
            .map_err(|_| Error::LockPoisoned)
            .and_then(|mut state| state.wal.close());

        self.dir_lock.lock().map_err(|_| Error::LockPoisoned)?.take();
        info!(path = %self.dir.display(), "database closed");
        result
    }

    /// Whether [`StorageEngine::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing database on drop");
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Latest committed sequence
    pub latest_sequence: SequenceNumber,
    /// Bytes buffered in active and frozen memtables
    pub memtable_bytes: usize,
    /// Versions buffered in active and frozen memtables
    pub memtable_entries: usize,
    /// Frozen memtables waiting for flush
    pub immutable_memtables: usize,
    /// Number of SSTables at each level
    pub level_files: Vec<usize>,
    /// Total disk size of SSTables
    pub total_sst_bytes: u64,
    /// Estimated number of stored versions
    pub estimated_keys: u64,
    /// Live snapshots
    pub snapshots: usize,
    /// Oldest pinned sequence
    pub oldest_snapshot: Option<SequenceNumber>,
    /// Compactions completed over the database's lifetime
    pub compaction_count: u64,
    /// Compaction statistics for this handle
    pub compaction: CompactionStats,
    /// Registered namespaces
    pub namespaces: usize,
    /// WAL segment files on disk
    pub wal_segments: usize,
}

impl fmt::Display for StorageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "latest sequence:     {}", self.latest_sequence)?;
        writeln!(
            f,
            "memtables:           {} bytes, {} entries, {} immutable",
            self.memtable_bytes, self.memtable_entries, self.immutable_memtables
        )?;
        for (level, files) in self.level_files.iter().enumerate() {
            writeln!(f, "level {} files:       {}", level, files)?;
        }
        writeln!(f, "sst bytes:           {}", self.total_sst_bytes)?;
        writeln!(f, "estimated keys:      {}", self.estimated_keys)?;
        writeln!(
            f,
            "snapshots:           {} (oldest {})",
            self.snapshots,
            self.oldest_snapshot
                .map_or_else(|| "-".to_string(), |s| s.to_string())
        )?;
        writeln!(
            f,
            "compactions:         {} total, {} this session, {} entries removed",
            self.compaction_count, self.compaction.compaction_count, self.compaction.entries_removed
        )?;
        writeln!(f, "namespaces:          {}", self.namespaces)?;
        write!(f, "wal segments:        {}", self.wal_segments)
    }
}

/// Validate the database directory, creating it when allowed
fn prepare_dir(dir: &Path, create_if_missing: bool) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => Err(Error::Config(format!(
            "{} exists and is not a directory",
            dir.display()
        ))),
        Ok(_) if !create_if_missing && !Manifest::exists(dir) => Err(Error::Config(format!(
            "no database at {} and create_if_missing is false",
            dir.display()
        ))),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if !create_if_missing {
                return Err(Error::Config(format!(
                    "database {} does not exist and create_if_missing is false",
                    dir.display()
                )));
            }
            fs::create_dir_all(dir)?;
            Ok(())
        }
        Err(e) => Err(Error::Io(e)),
    }
}

fn open_tables(
    manifest: &Manifest,
    table_dir: &Path,
) -> Result<BTreeMap<NamespaceId, view::NamespaceTables>> {
    let mut tables: BTreeMap<NamespaceId, view::NamespaceTables> = BTreeMap::new();
    for entry in manifest.all_sstables() {
        let meta = entry.to_meta(table_dir);
        let reader = Arc::new(SSTableReader::open(&meta.path)?);
        let level = meta.level;
        let table = Arc::new(Table { meta, reader });
        let ns_tables = tables.entry(entry.namespace).or_default();
        if level == 0 {
            ns_tables.push_level0(table);
        } else {
            ns_tables.push_level1(table);
        }
    }
    Ok(tables)
}

/// Delete table files the manifest does not reference
///
/// They are left over from flushes or compactions that crashed before
/// their manifest edit.
fn remove_orphan_tables(table_dir: &Path, manifest: &Manifest) -> Result<()> {
    let live: HashSet<&str> = manifest
        .all_sstables()
        .iter()
        .map(|s| s.file_name.as_str())
        .collect();

    for entry in fs::read_dir(table_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".sst") && !live.contains(name) {
            warn!(path = %path.display(), "removing orphan table");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
