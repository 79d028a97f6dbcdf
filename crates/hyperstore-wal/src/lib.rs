//! # hyperstore WAL (Write-Ahead Log)
//!
//! Write-Ahead Log implementation for hyperstore, providing durable,
//! crash-recoverable commit logging.
//!
//! ## Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of hyperstore.**
//! Users should depend on the `hyperstore` crate instead, which provides the
//! stable public API.

// Every commit is appended as one framed record holding the whole batch.
// After a memtable flush a checkpoint record is written and the segments
// that only describe flushed data are deleted.

use hyperstore_core::{Result, SequenceNumber};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Default segment rotation size (64MB)
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

pub mod reader;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod writer;

pub use reader::WalReader;
pub use record::{RecordPayload, WalRecord};
pub use recovery::{RecoveredBatch, RecoveredLog, RecoveryManager, RecoveryStats};
pub use segment::{SegmentInfo, SegmentManager};
pub use writer::WalWriter;

/// Where segments live and how they are synced
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// When appends reach stable storage
    pub sync_mode: SyncMode,
    /// Segment size that triggers rotation
    pub max_segment_size: u64,
    /// Segment directory
    pub wal_dir: PathBuf,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Sync,
            max_segment_size: DEFAULT_SEGMENT_SIZE,
            wal_dir: PathBuf::from("wal"),
        }
    }
}

/// fsync policy for appends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// fsync every append before it returns
    #[default]
    Sync,
    /// Hand writes to the OS, fsync on segment boundaries and explicit syncs
    Async,
    /// Never fsync; an OS crash can lose acknowledged commits
    None,
}

/// Owns the active segment writer and hands out readers and recovery
pub struct WalManager {
    config: WalConfig,
    writer: Option<WalWriter>,
}

impl WalManager {
    /// Manager for `config`; nothing is opened until [`WalManager::open`]
    pub fn new(config: WalConfig) -> Result<Self> {
        Ok(Self {
            config,
            writer: None,
        })
    }

    /// Start accepting appends
    ///
    /// Appends always go to a brand-new segment.
    pub fn open(&mut self) -> Result<()> {
        let writer = WalWriter::new(
            &self.config.wal_dir,
            self.config.max_segment_size,
            self.config.sync_mode,
        )?;
        self.writer = Some(writer);

        Ok(())
    }

    fn writer_mut(&mut self) -> Result<&mut WalWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| hyperstore_core::Error::InvalidState("WAL not opened".to_string()))
    }

    /// Append one framed record, forcing an fsync when `force_sync` is set
    ///
    /// A failed append leaves nothing of the record behind. When that cannot
    /// be guaranteed every later append fails until the log is reopened.
    pub fn append(&mut self, record: &WalRecord, force_sync: bool) -> Result<()> {
        self.writer_mut()?.append(record, force_sync)
    }

    /// fsync the active segment
    pub fn sync(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.sync()
        } else {
            Ok(())
        }
    }

    /// Start a new segment, returning its id
    ///
    /// Records appended before this call live in segments with a smaller id.
    pub fn rotate(&mut self) -> Result<u64> {
        self.writer_mut()?.rotate()
    }

    /// Record that every batch up to `sequence` is persisted and delete the
    /// segments older than `obsolete_before`
    pub fn checkpoint(&mut self, sequence: SequenceNumber, obsolete_before: u64) -> Result<usize> {
        self.writer_mut()?
            .append(&WalRecord::checkpoint(sequence), false)?;
        let removed = self.segment_manager().cleanup_before(obsolete_before)?;
        debug!(sequence, removed, "WAL checkpoint");
        Ok(removed)
    }

    /// Sync and drop the writer
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            if !writer.is_failed() {
                writer.sync()?;
            }
        }
        Ok(())
    }

    /// Recover batches newer than `persisted_sequence`
    pub fn recover(&self, persisted_sequence: SequenceNumber) -> Result<RecoveredLog> {
        let recovery = RecoveryManager::new(self.config.clone())?;
        recovery.recover(persisted_sequence)
    }

    /// Scan the log without replaying it
    pub fn stats(&self) -> Result<RecoveryStats> {
        let recovery = RecoveryManager::new(self.config.clone())?;
        recovery.get_stats()
    }

    /// Reader positioned at the oldest segment
    pub fn reader(&self) -> Result<WalReader> {
        WalReader::new(&self.config.wal_dir)
    }

    /// Segment listing and cleanup for this log
    pub fn segment_manager(&self) -> SegmentManager {
        SegmentManager::new(self.config.wal_dir.clone())
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Id of the segment being written, if open
    pub fn current_segment(&self) -> Option<u64> {
        self.writer.as_ref().map(WalWriter::segment_id)
    }

    /// Whether appends are accepted
    pub fn is_open(&self) -> bool {
        self.writer.as_ref().is_some_and(|w| !w.is_failed())
    }
}
