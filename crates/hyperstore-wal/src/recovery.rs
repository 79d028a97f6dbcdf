// WAL recovery module - handles crash recovery logic
//
// Recovery is responsible for:
// 1. Reading all WAL records from disk in segment order
// 2. Skipping batches already persisted (at or below the flushed sequence
//    or the newest checkpoint)
// 3. Stopping at the first corrupt record: everything before it is a
//    consistent prefix, nothing after it can be trusted

use crate::record::RecordPayload;
use crate::{WalConfig, WalReader};
use hyperstore_core::{Error, Result, SequenceNumber, WriteOp};
use tracing::{info, warn};

/// A batch that must be re-applied to the memtable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredBatch {
    /// Commit sequence of the batch
    pub sequence: SequenceNumber,
    /// Mutations in commit order
    pub ops: Vec<WriteOp>,
}

/// Result of replaying the log
#[derive(Debug, Clone, Default)]
pub struct RecoveredLog {
    /// Batches newer than the persisted state, in log order
    pub batches: Vec<RecoveredBatch>,
    /// Highest sequence seen in the log (0 if none)
    pub last_sequence: SequenceNumber,
    /// Statistics gathered during the scan
    pub stats: RecoveryStats,
}

/// Manages WAL recovery after crash or restart
pub struct RecoveryManager {
    config: WalConfig,
}

impl RecoveryManager {
    /// Create a new recovery manager with the given configuration
    pub fn new(config: WalConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Recover batches with a sequence above `persisted_sequence`
    pub fn recover(&self, persisted_sequence: SequenceNumber) -> Result<RecoveredLog> {
        let mut reader = WalReader::new(&self.config.wal_dir)?;
        let mut log = RecoveredLog::default();
        log.stats.segments = reader.segment_count();

        if reader.segment_count() == 0 {
            return Ok(log);
        }

        let mut floor = persisted_sequence;

        loop {
            match reader.next_record() {
                Ok(Some(record)) => {
                    log.stats.total_records += 1;
                    log.last_sequence = log.last_sequence.max(record.sequence());
                    match record.payload {
                        RecordPayload::Batch { sequence, ops } => {
                            if sequence <= floor {
                                log.stats.batches_skipped += 1;
                                continue;
                            }
                            log.stats.batches_replayed += 1;
                            log.stats.ops_replayed += ops.len() as u64;
                            log.batches.push(RecoveredBatch { sequence, ops });
                        }
                        RecordPayload::Checkpoint { sequence } => {
                            log.stats.checkpoints += 1;
                            floor = floor.max(sequence);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    if Self::is_recoverable_error(&e) {
                        warn!(error = %e, "stopping WAL replay at corrupt record");
                        log.stats.corrupt_tail = true;
                        break;
                    }
                    return Err(e);
                }
            }
        }

        // A checkpoint later in the log may cover batches collected before it
        log.batches.retain(|b| b.sequence > floor);
        log.stats.truncated_segments = reader.truncated_segments();

        info!(
            replayed = log.batches.len(),
            last_sequence = log.last_sequence,
            corrupt_tail = log.stats.corrupt_tail,
            "WAL recovery finished"
        );

        Ok(log)
    }

    /// Scan the log without filtering and report statistics
    pub fn get_stats(&self) -> Result<RecoveryStats> {
        self.recover(0).map(|log| log.stats)
    }

    /// Errors that end replay without failing the open
    fn is_recoverable_error(err: &Error) -> bool {
        matches!(err, Error::Corruption(_) | Error::Serialization(_))
    }
}

/// Statistics about WAL recovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Segment files found
    pub segments: usize,
    /// Records decoded successfully
    pub total_records: u64,
    /// Batches returned for replay
    pub batches_replayed: u64,
    /// Batches already persisted
    pub batches_skipped: u64,
    /// Mutations inside replayed batches
    pub ops_replayed: u64,
    /// Checkpoint records seen
    pub checkpoints: u64,
    /// Segments that ended in a partial record
    pub truncated_segments: usize,
    /// Replay stopped at a record that failed validation
    pub corrupt_tail: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SyncMode, WalRecord, WalWriter};
    use hyperstore_core::NamespaceId;
    use tempfile::TempDir;

    fn setup() -> (TempDir, WalConfig) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = WalConfig {
            wal_dir: temp_dir.path().join("wal"),
            sync_mode: SyncMode::Sync,
            max_segment_size: 1 << 20,
        };
        (temp_dir, config)
    }

    fn batch(seq: u64) -> WalRecord {
        WalRecord::batch(
            seq,
            vec![WriteOp::Put {
                namespace: NamespaceId::DEFAULT,
                key: format!("k{}", seq).into_bytes(),
                value: vec![seq as u8],
            }],
        )
    }

    #[test]
    fn test_recover_empty() {
        let (_temp_dir, config) = setup();
        let log = RecoveryManager::new(config).unwrap().recover(0).unwrap();
        assert!(log.batches.is_empty());
        assert_eq!(log.last_sequence, 0);
    }

    #[test]
    fn test_recover_skips_persisted_batches() {
        let (_temp_dir, config) = setup();
        {
            let mut writer =
                WalWriter::new(&config.wal_dir, config.max_segment_size, config.sync_mode)
                    .unwrap();
            for seq in 1..=5 {
                writer.append(&batch(seq), false).unwrap();
            }
        }

        let log = RecoveryManager::new(config).unwrap().recover(3).unwrap();
        let seqs: Vec<u64> = log.batches.iter().map(|b| b.sequence).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(log.last_sequence, 5);
        assert_eq!(log.stats.batches_skipped, 3);
    }

    #[test]
    fn test_checkpoint_raises_floor() {
        let (_temp_dir, config) = setup();
        {
            let mut writer =
                WalWriter::new(&config.wal_dir, config.max_segment_size, config.sync_mode)
                    .unwrap();
            writer.append(&batch(1), false).unwrap();
            writer.append(&batch(2), false).unwrap();
            writer.append(&WalRecord::checkpoint(2), false).unwrap();
            writer.append(&batch(3), false).unwrap();
        }

        let log = RecoveryManager::new(config).unwrap().recover(0).unwrap();
        let seqs: Vec<u64> = log.batches.iter().map(|b| b.sequence).collect();
        assert_eq!(seqs, vec![3]);
        assert_eq!(log.stats.checkpoints, 1);
    }

    #[test]
    fn test_corrupt_record_stops_replay() {
        let (_temp_dir, config) = setup();
        let path = {
            let mut writer =
                WalWriter::new(&config.wal_dir, config.max_segment_size, config.sync_mode)
                    .unwrap();
            writer.append(&batch(1), false).unwrap();
            writer.append(&batch(2), false).unwrap();
            writer.current_segment_path().clone()
        };

        // Flip a byte inside the last record's payload
        let mut bytes = std::fs::read(&path).unwrap();
        let idx = bytes.len() - 6;
        bytes[idx] ^= 0xAA;
        std::fs::write(&path, bytes).unwrap();

        let log = RecoveryManager::new(config).unwrap().recover(0).unwrap();
        assert_eq!(log.batches.len(), 1);
        assert_eq!(log.batches[0].sequence, 1);
        assert!(log.stats.corrupt_tail);
    }
}
