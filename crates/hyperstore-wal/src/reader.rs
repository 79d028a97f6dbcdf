//! Sequential reading of WAL segments.
//!
//! Segments are visited in id order. Each one starts with a header (magic
//! and format version) followed by framed records. A segment that stops in
//! the middle of a frame was being appended to when the process died; the
//! partial frame is skipped and reading resumes with the next segment.
//! Checksum and header failures are errors.

use crate::record::WalRecord;
use crate::writer::{parse_segment_id, SEGMENT_HEADER_SIZE};
use hyperstore_core::format_version::{self, magic};
use hyperstore_core::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Upper bound on a single record, guards against garbage length fields
const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// Length prefix plus trailing CRC
const FRAME_OVERHEAD: usize = 8;

/// Outcome of reading one frame
enum Frame {
    /// A record and the bytes its frame occupied
    Record(WalRecord, usize),
    /// Clean end of the segment
    End,
    /// The segment stops inside a frame
    Torn,
}

/// Reads every record of a WAL directory in commit order
pub struct WalReader {
    segments: Vec<PathBuf>,
    /// Index into `segments` of the open (or next) segment
    position: usize,
    open: Option<BufReader<File>>,
    /// Offset of the next frame in the open segment
    offset: u64,
    truncated_segments: usize,
}

impl WalReader {
    /// List the segments under `wal_dir` and open the first one
    pub fn new(wal_dir: &Path) -> Result<Self> {
        let mut reader = Self {
            segments: list_segments(wal_dir)?,
            position: 0,
            open: None,
            offset: 0,
            truncated_segments: 0,
        };
        reader.open_at(0)?;
        Ok(reader)
    }

    /// Open segment `index`, leaving nothing open past the last segment
    fn open_at(&mut self, index: usize) -> Result<()> {
        self.position = index;
        self.offset = 0;
        self.open = None;

        let Some(path) = self.segments.get(index) else {
            return Ok(());
        };
        let mut file = BufReader::new(File::open(path)?);

        let mut header = [0u8; SEGMENT_HEADER_SIZE as usize];
        if read_up_to(&mut file, &mut header)? < header.len() {
            // Crash while the segment was being created
            warn!(segment = ?path, "WAL segment shorter than its header, skipping");
            return Ok(());
        }

        let found = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if found != magic::WAL {
            return Err(Error::Corruption(format!(
                "{} is not a WAL segment (magic {:#010x})",
                path.display(),
                found
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if !format_version::WAL.can_read(version) {
            return Err(Error::Corruption(format!(
                "{} has unsupported WAL format version {}",
                path.display(),
                version
            )));
        }

        self.offset = SEGMENT_HEADER_SIZE;
        self.open = Some(file);
        Ok(())
    }

    /// Next record across all segments, `None` once every segment is read
    pub fn next_record(&mut self) -> Result<Option<WalRecord>> {
        while self.position < self.segments.len() {
            let frame = match self.open.as_mut() {
                Some(file) => read_frame(file)?,
                None => Frame::End,
            };

            match frame {
                Frame::Record(record, size) => {
                    self.offset += size as u64;
                    return Ok(Some(record));
                }
                Frame::End => {}
                Frame::Torn => {
                    warn!(
                        segment = ?self.segments[self.position],
                        offset = self.offset,
                        "WAL segment ends in a partial record"
                    );
                    self.truncated_segments += 1;
                }
            }
            self.open_at(self.position + 1)?;
        }
        Ok(None)
    }

    /// Number of segments found when the reader was created
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Index of the segment being read
    pub fn current_segment(&self) -> usize {
        self.position
    }

    /// Segments that ended in a partial record so far
    pub fn truncated_segments(&self) -> usize {
        self.truncated_segments
    }

    /// Start over from the first segment
    pub fn reset(&mut self) -> Result<()> {
        self.truncated_segments = 0;
        self.open_at(0)
    }

    /// Drain the remaining records
    pub fn read_all(&mut self) -> Result<Vec<WalRecord>> {
        std::iter::from_fn(|| self.next_record().transpose()).collect()
    }
}

impl Iterator for WalReader {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Segment files under `wal_dir`, sorted by id
fn list_segments(wal_dir: &Path) -> Result<Vec<PathBuf>> {
    if !wal_dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(wal_dir)? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(parse_segment_id) {
            found.push((id, entry.path()));
        }
    }
    found.sort_by_key(|(id, _)| *id);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Read one `len | body | crc` frame
fn read_frame(file: &mut impl Read) -> Result<Frame> {
    let mut len_bytes = [0u8; 4];
    match read_up_to(file, &mut len_bytes)? {
        0 => return Ok(Frame::End),
        4 => {}
        _ => return Ok(Frame::Torn),
    }

    let body_len = u32::from_le_bytes(len_bytes) as usize;
    if body_len > MAX_RECORD_SIZE {
        return Err(Error::Corruption(format!(
            "WAL record claims {} bytes",
            body_len
        )));
    }

    let mut frame = vec![0u8; body_len + FRAME_OVERHEAD];
    frame[..4].copy_from_slice(&len_bytes);
    if read_up_to(file, &mut frame[4..])? < body_len + 4 {
        return Ok(Frame::Torn);
    }

    let (record, size) = WalRecord::decode(&frame)?;
    Ok(Frame::Record(record, size))
}

/// Fill as much of `buf` as the reader allows; returns the bytes read
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
