// WAL writer module - handles appending records to the log
//
// Every segment starts with a small header:
// [magic: u32 LE] [format version: u16 LE]
//
// A writer never appends to a segment left behind by an earlier process;
// it always starts a fresh one, so a torn tail from a crash is never
// followed by new records in the same file.
//
// An append that fails after some of its bytes reached the segment is cut
// back off, so a record that reported failure is never replayed. If the cut
// itself fails the writer refuses every further append.

use crate::record::WalRecord;
use crate::SyncMode;
use hyperstore_core::format_version::{self, magic};
use hyperstore_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Size of the per-segment header
pub const SEGMENT_HEADER_SIZE: u64 = 6;

/// File name for segment `id`
pub fn segment_file_name(id: u64) -> String {
    format!("wal-{:016x}.log", id)
}

/// Parse the segment id out of a file name produced by [`segment_file_name`]
pub fn parse_segment_id(name: &str) -> Option<u64> {
    let hex = name.strip_prefix("wal-")?.strip_suffix(".log")?;
    u64::from_str_radix(hex, 16).ok()
}

/// Faults a test can arm; each fires once
#[cfg(test)]
#[derive(Debug, Default)]
struct Faults {
    sync: bool,
    truncate: bool,
}

pub struct WalWriter {
    // Frames are encoded in full before they are written, so no buffering
    file: File,
    current_segment: PathBuf,
    segment_id: u64,
    current_size: u64,
    max_segment_size: u64,
    sync_mode: SyncMode,
    records_written: u64,
    wal_dir: PathBuf,
    /// Set when a failed append could not be cut back off the segment
    failed: Option<String>,
    #[cfg(test)]
    faults: Faults,
}

impl WalWriter {
    pub fn new(wal_dir: &Path, max_segment_size: u64, sync_mode: SyncMode) -> Result<Self> {
        std::fs::create_dir_all(wal_dir)
            .map_err(|e| Error::Storage(format!("Failed to create WAL directory: {}", e)))?;

        let segment_id = Self::find_max_segment(wal_dir)? + 1;
        let (file, current_segment) = Self::create_segment(wal_dir, segment_id)?;

        debug!(segment = segment_id, "opened WAL segment");

        Ok(Self {
            file,
            current_segment,
            segment_id,
            current_size: SEGMENT_HEADER_SIZE,
            max_segment_size,
            sync_mode,
            records_written: 0,
            wal_dir: wal_dir.to_path_buf(),
            failed: None,
            #[cfg(test)]
            faults: Faults::default(),
        })
    }

    /// Find the highest segment id present in the directory (0 if none)
    fn find_max_segment(wal_dir: &Path) -> Result<u64> {
        let mut max_id = 0u64;

        let entries = std::fs::read_dir(wal_dir)
            .map_err(|e| Error::Storage(format!("Failed to read WAL directory: {}", e)))?;
        for entry in entries.flatten() {
            if let Some(id) = entry.file_name().to_str().and_then(parse_segment_id) {
                max_id = max_id.max(id);
            }
        }

        Ok(max_id)
    }

    fn create_segment(wal_dir: &Path, id: u64) -> Result<(File, PathBuf)> {
        let path = wal_dir.join(segment_file_name(id));
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to create WAL segment {:?}: {}", path, e)))?;

        let mut header = Vec::with_capacity(SEGMENT_HEADER_SIZE as usize);
        header.extend_from_slice(&magic::WAL.to_le_bytes());
        header.extend_from_slice(&format_version::WAL.current.to_le_bytes());
        file.write_all(&header)?;

        Ok((file, path))
    }

    /// Append one record.
    ///
    /// The bytes always reach the OS before this returns; they are fsynced
    /// as well when the sync mode is `Sync` or `force_sync` is set. On error
    /// the segment is cut back to its length before the call.
    pub fn append(&mut self, record: &WalRecord, force_sync: bool) -> Result<()> {
        self.check_usable()?;
        let encoded = record.encode()?;
        let record_size = encoded.len() as u64;

        if self.current_size > SEGMENT_HEADER_SIZE
            && self.current_size + record_size > self.max_segment_size
        {
            self.rotate()?;
        }

        let sync = force_sync || matches!(self.sync_mode, SyncMode::Sync);
        if let Err(e) = self.write_frame(&encoded, sync) {
            self.roll_back();
            return Err(e.into());
        }

        self.current_size += record_size;
        self.records_written += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> io::Result<()> {
        self.file.write_all(frame)?;
        if sync {
            #[cfg(test)]
            if std::mem::take(&mut self.faults.sync) {
                return Err(io::Error::new(io::ErrorKind::Other, "injected sync failure"));
            }
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut the segment back to the end of the last complete append
    fn roll_back(&mut self) {
        let size = self.current_size;
        match self.truncate_to(size) {
            Ok(()) => warn!(
                segment = self.segment_id,
                size, "discarded partially written WAL record"
            ),
            Err(e) => {
                error!(segment = self.segment_id, error = %e, "failed to discard partial WAL record");
                self.failed = Some(format!(
                    "{} could not be restored after a failed append: {}",
                    self.current_segment.display(),
                    e
                ));
            }
        }
    }

    fn truncate_to(&mut self, size: u64) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.faults.truncate) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected truncate failure"));
        }
        self.file.set_len(size)?;
        self.file.seek(SeekFrom::Start(size))?;
        self.file.sync_data()
    }

    fn check_usable(&self) -> Result<()> {
        match &self.failed {
            Some(reason) => Err(Error::Storage(format!(
                "WAL stopped accepting writes: {}; reopen the database",
                reason
            ))),
            None => Ok(()),
        }
    }

    /// Whether an append failed in a way that stops this writer
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.check_usable()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Close the current segment and continue in a new one.
    ///
    /// Returns the id of the new segment.
    pub fn rotate(&mut self) -> Result<u64> {
        self.check_usable()?;
        if !matches!(self.sync_mode, SyncMode::None) {
            self.sync()?;
        }

        let next_id = self.segment_id + 1;
        let (file, path) = Self::create_segment(&self.wal_dir, next_id)?;

        self.file = file;
        self.current_segment = path;
        self.segment_id = next_id;
        self.current_size = SEGMENT_HEADER_SIZE;

        debug!(segment = next_id, "rotated WAL segment");
        Ok(next_id)
    }

    /// Get the current segment path
    pub fn current_segment_path(&self) -> &PathBuf {
        &self.current_segment
    }

    /// Id of the segment currently being written
    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Records appended by this writer
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Get the current segment size in bytes
    pub fn current_segment_size(&self) -> u64 {
        self.current_size
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        // Best effort sync on drop
        if self.failed.is_none() {
            let _ = self.sync();
        }
    }
}
