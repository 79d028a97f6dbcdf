// WAL segment management - handles cleanup and segment metadata
//
// Segments are named: wal-{id:016x}.log
// Where id is a monotonically increasing hex number

use crate::writer::parse_segment_id;
use hyperstore_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manages WAL segment files
pub struct SegmentManager {
    wal_dir: PathBuf,
}

/// Information about a WAL segment file
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// Path to the segment file
    pub path: PathBuf,
    /// Segment id extracted from filename
    pub id: u64,
    /// File size in bytes
    pub size: u64,
}

impl SegmentManager {
    /// Create a new segment manager for the given WAL directory
    pub fn new(wal_dir: PathBuf) -> Self {
        Self { wal_dir }
    }

    /// List all segment files in order
    pub fn list_segments(&self) -> Result<Vec<SegmentInfo>> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }

        let mut segments: Vec<SegmentInfo> = fs::read_dir(&self.wal_dir)
            .map_err(|e| Error::Storage(format!("Failed to read WAL directory: {}", e)))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Self::parse_segment_info(&entry.path()))
            .collect();

        segments.sort_by_key(|s| s.id);

        Ok(segments)
    }

    fn parse_segment_info(path: &Path) -> Option<SegmentInfo> {
        let id = parse_segment_id(path.file_name()?.to_str()?)?;
        let size = fs::metadata(path).ok()?.len();

        Some(SegmentInfo {
            path: path.to_path_buf(),
            id,
            size,
        })
    }

    /// Get the total size of all segments
    pub fn total_size(&self) -> Result<u64> {
        let segments = self.list_segments()?;
        Ok(segments.iter().map(|s| s.size).sum())
    }

    /// Get the number of segment files
    pub fn segment_count(&self) -> Result<usize> {
        Ok(self.list_segments()?.len())
    }

    /// Delete segments whose id is below `id`
    ///
    /// Called once everything those segments describe is persisted elsewhere.
    /// Returns the number of segments deleted.
    pub fn cleanup_before(&self, id: u64) -> Result<usize> {
        let segments = self.list_segments()?;
        let mut deleted = 0;

        for segment in segments.into_iter().filter(|s| s.id < id) {
            fs::remove_file(&segment.path).map_err(|e| {
                Error::Storage(format!(
                    "Failed to delete segment {:?}: {}",
                    segment.path, e
                ))
            })?;
            debug!(segment = segment.id, "removed obsolete WAL segment");
            deleted += 1;
        }

        Ok(deleted)
    }

    /// Get the latest (highest id) segment
    pub fn latest_segment(&self) -> Result<Option<SegmentInfo>> {
        let segments = self.list_segments()?;
        Ok(segments.into_iter().last())
    }

    /// Get the oldest (lowest id) segment
    pub fn oldest_segment(&self) -> Result<Option<SegmentInfo>> {
        let segments = self.list_segments()?;
        Ok(segments.into_iter().next())
    }
}
