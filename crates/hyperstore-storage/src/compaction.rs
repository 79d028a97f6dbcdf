//! Compaction - merging level-0 tables into level 1
//!
//! Compaction merges SSTables of one namespace to reduce read
//! amplification and reclaim space from overwritten versions and
//! tombstones. Level 1 is the bottom of the tree, so every compaction
//! output is bottommost for the keys it covers.
//!
//! ## Retention
//!
//! `smallest_snapshot` is the oldest sequence any reader may still use.
//! Walking the versions of one key from newest to oldest, a version is
//! dropped when a newer version of the same key is already visible at
//! `smallest_snapshot`, and a tombstone is dropped once it is itself
//! visible there, since nothing older survives below it.

use crate::sstable::{SSTableEntry, SSTableMeta, SSTableOptions, SSTableReader, SSTableWriter};
use hyperstore_core::{NamespaceId, Result, SequenceNumber};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Compaction configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Number of level-0 tables in a namespace that triggers compaction
    pub level0_trigger: usize,
    /// Target file size for output SSTables
    pub target_file_size: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            level0_trigger: 4,
            target_file_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Statistics for compaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Total bytes read during compaction
    pub bytes_read: u64,
    /// Total bytes written during compaction
    pub bytes_written: u64,
    /// Number of compactions performed
    pub compaction_count: u64,
    /// Number of entries removed (tombstones + overwritten)
    pub entries_removed: u64,
}

/// Tables feeding one compaction
pub struct CompactionJob {
    /// Namespace being compacted
    pub namespace: NamespaceId,
    /// Input tables, any order
    pub inputs: Vec<Arc<SSTableReader>>,
    /// Oldest sequence a reader may still observe
    pub smallest_snapshot: SequenceNumber,
}

/// Result of a merge
#[derive(Debug, Default)]
pub struct CompactionOutput {
    /// New level-1 tables in key order
    pub outputs: Vec<SSTableMeta>,
    /// Entries copied to the outputs
    pub entries_kept: u64,
    /// Entries dropped by retention
    pub entries_removed: u64,
}

/// Entry for merge iterator (with ordering)
#[derive(Debug)]
struct MergeEntry {
    entry: SSTableEntry,
    source_idx: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse (key asc, sequence desc) so the
        // smallest key with the newest version pops first
        let mine = (&self.entry.key, Reverse(self.entry.sequence), self.source_idx);
        let theirs = (&other.entry.key, Reverse(other.entry.sequence), other.source_idx);
        theirs.cmp(&mine)
    }
}

/// Compaction worker
pub struct CompactionWorker {
    /// Configuration
    config: CompactionConfig,
    /// Table build options for outputs
    table_options: SSTableOptions,
    /// Statistics
    stats: CompactionStats,
}

impl CompactionWorker {
    /// Create a new compaction worker
    pub fn new(config: CompactionConfig, table_options: SSTableOptions) -> Self {
        Self {
            config,
            table_options,
            stats: CompactionStats::default(),
        }
    }

    /// Check if a namespace with `level0_count` level-0 tables needs compaction
    pub fn needs_compaction(&self, level0_count: usize) -> bool {
        level0_count >= self.config.level0_trigger.max(1)
    }

    /// Get the configuration
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Merge the job's inputs into new level-1 tables
    ///
    /// `next_path` hands out a fresh file path for every output table.
    pub fn run(
        &mut self,
        job: &CompactionJob,
        next_path: &mut dyn FnMut() -> Result<PathBuf>,
    ) -> Result<CompactionOutput> {
        let mut output = CompactionOutput::default();
        if job.inputs.is_empty() {
            return Ok(output);
        }

        let mut iterators: Vec<_> = job.inputs.iter().map(|r| r.iter()).collect();
        for reader in &job.inputs {
            self.stats.bytes_read += reader.file_size();
        }

        // Prime the heap with first entry from each SSTable
        let mut heap: BinaryHeap<MergeEntry> = BinaryHeap::new();
        for (idx, iter) in iterators.iter_mut().enumerate() {
            if let Some(entry) = iter.next_entry()? {
                heap.push(MergeEntry {
                    entry,
                    source_idx: idx,
                });
            }
        }

        let mut current_writer: Option<SSTableWriter> = None;
        let mut current_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = SequenceNumber::MAX;

        while let Some(merge_entry) = heap.pop() {
            // Advance the iterator that provided this entry
            if let Some(next) = iterators[merge_entry.source_idx].next_entry()? {
                heap.push(MergeEntry {
                    entry: next,
                    source_idx: merge_entry.source_idx,
                });
            }

            let entry = merge_entry.entry;
            let new_key = current_key.as_deref() != Some(entry.key.as_slice());
            if new_key {
                current_key = Some(entry.key.clone());
                last_sequence_for_key = SequenceNumber::MAX;
            }

            let drop = if last_sequence_for_key <= job.smallest_snapshot {
                // Hidden by a newer version every reader can see
                true
            } else {
                entry.is_tombstone() && entry.sequence <= job.smallest_snapshot
            };
            last_sequence_for_key = entry.sequence;

            if drop {
                output.entries_removed += 1;
                continue;
            }

            // Cut output files only between user keys
            let full = current_writer
                .as_ref()
                .is_some_and(|w| w.estimated_size() >= self.config.target_file_size);
            if full && new_key {
                if let Some(writer) = current_writer.take() {
                    self.finish_output(writer, &mut output)?;
                }
            }

            if current_writer.is_none() {
                current_writer = Some(SSTableWriter::new(
                    next_path()?,
                    job.namespace,
                    self.table_options,
                )?);
            }
            if let Some(writer) = current_writer.as_mut() {
                writer.add(entry)?;
                output.entries_kept += 1;
            }
        }

        // Finish last writer
        if let Some(writer) = current_writer {
            self.finish_output(writer, &mut output)?;
        }

        self.stats.compaction_count += 1;
        self.stats.entries_removed += output.entries_removed;

        info!(
            namespace = %job.namespace,
            inputs = job.inputs.len(),
            outputs = output.outputs.len(),
            kept = output.entries_kept,
            removed = output.entries_removed,
            "compaction finished"
        );

        Ok(output)
    }

    fn finish_output(&mut self, writer: SSTableWriter, output: &mut CompactionOutput) -> Result<()> {
        let mut meta = writer.finish()?;
        meta.level = 1;
        self.stats.bytes_written += meta.file_size;
        debug!(path = %meta.path.display(), size = meta.file_size, "compaction output written");
        output.outputs.push(meta);
        Ok(())
    }

    /// Get compaction statistics
    pub fn stats(&self) -> &CompactionStats {
        &self.stats
    }
}
