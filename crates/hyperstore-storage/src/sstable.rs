//! SSTable - Sorted String Table format and I/O
//!
//! SSTables are immutable on-disk files holding the versions of one
//! namespace, sorted by user key ascending and sequence descending.
//!
//! ## File Format
//!
//! ```text
//! +------------------+
//! | Data Blocks      |  <- Entries grouped in blocks, each compressed + CRC32
//! +------------------+
//! | Index Block      |  <- First/last key, offset and size per data block
//! +------------------+
//! | Bloom Block      |  <- Bloom filter over user keys
//! +------------------+
//! | Footer           |  <- Magic, version, namespace, ranges, offsets, CRC
//! +------------------+
//! | Footer Length    |  <- u32 LE
//! +------------------+
//! ```

use crate::bloom::{BloomFilter, DEFAULT_BITS_PER_KEY};
use crate::compression::{compress, decompress};
use crate::memtable::MemtableEntry;
use hyperstore_core::format_version::{self, magic};
use hyperstore_core::{Compression, Error, NamespaceId, Result, SequenceNumber};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Default block size (4KB)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Entry type tags
const ENTRY_TYPE_VALUE: u8 = 0;
const ENTRY_TYPE_TOMBSTONE: u8 = 1;

/// A single version stored in an SSTable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SSTableEntry {
    /// The user key
    pub key: Vec<u8>,
    /// Commit sequence of this version
    pub sequence: SequenceNumber,
    /// Entry type: 0 = value, 1 = tombstone
    pub entry_type: u8,
    /// The value (empty for tombstones)
    pub value: Vec<u8>,
}

impl SSTableEntry {
    /// Create a value entry
    pub fn value(key: Vec<u8>, sequence: SequenceNumber, value: Vec<u8>) -> Self {
        Self {
            key,
            sequence,
            entry_type: ENTRY_TYPE_VALUE,
            value,
        }
    }

    /// Create a tombstone entry
    pub fn tombstone(key: Vec<u8>, sequence: SequenceNumber) -> Self {
        Self {
            key,
            sequence,
            entry_type: ENTRY_TYPE_TOMBSTONE,
            value: Vec::new(),
        }
    }

    /// Build from a memtable version
    pub fn from_memtable(key: Vec<u8>, sequence: SequenceNumber, entry: MemtableEntry) -> Self {
        match entry {
            MemtableEntry::Value(v) => Self::value(key, sequence, v),
            MemtableEntry::Tombstone => Self::tombstone(key, sequence),
        }
    }

    /// Check if this is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.entry_type == ENTRY_TYPE_TOMBSTONE
    }

    /// Approximate encoded size
    pub fn encoded_size(&self) -> usize {
        self.key.len() + self.value.len() + 8 + 1 + 16
    }

    fn order_key(&self) -> (&[u8], Reverse<SequenceNumber>) {
        (&self.key, Reverse(self.sequence))
    }
}

/// Index entry pointing to a data block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// First user key in the block
    pub first_key: Vec<u8>,
    /// Last user key in the block
    pub last_key: Vec<u8>,
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the stored block in bytes, CRC included
    pub size: u32,
}

/// SSTable footer containing metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SSTableFooter {
    /// Magic number for validation
    pub magic: u32,
    /// On-disk format version
    pub version: u16,
    /// Namespace whose versions this table holds
    pub namespace: NamespaceId,
    /// Compression tag applied to data blocks
    pub compression: u8,
    /// Offset of the index block
    pub index_offset: u64,
    /// Size of the index block
    pub index_size: u32,
    /// CRC32 of the index block
    pub index_crc: u32,
    /// Offset of the bloom block
    pub bloom_offset: u64,
    /// Size of the bloom block
    pub bloom_size: u32,
    /// CRC32 of the bloom block
    pub bloom_crc: u32,
    /// Number of entries in the SSTable
    pub entry_count: u64,
    /// Number of tombstones among them
    pub tombstone_count: u64,
    /// Minimum key in the SSTable
    pub min_key: Vec<u8>,
    /// Maximum key in the SSTable
    pub max_key: Vec<u8>,
    /// Smallest sequence stored
    pub min_sequence: SequenceNumber,
    /// Largest sequence stored
    pub max_sequence: SequenceNumber,
    /// CRC32 of the footer data
    pub crc: u32,
}

/// SSTable metadata (in-memory representation)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    /// Path to the SSTable file
    pub path: PathBuf,
    /// Namespace of the stored versions
    pub namespace: NamespaceId,
    /// Level in the LSM tree (0 = newest)
    pub level: u32,
    /// Minimum key
    pub min_key: Vec<u8>,
    /// Maximum key
    pub max_key: Vec<u8>,
    /// Number of entries
    pub entry_count: u64,
    /// File size in bytes
    pub file_size: u64,
    /// Smallest sequence stored
    pub min_sequence: SequenceNumber,
    /// Largest sequence stored
    pub max_sequence: SequenceNumber,
    /// Block compression
    pub compression: Compression,
}

/// Knobs for building a table
#[derive(Debug, Clone, Copy)]
pub struct SSTableOptions {
    /// Uncompressed size at which a data block is cut
    pub block_size: usize,
    /// Compression applied to data blocks
    pub compression: Compression,
    /// Bloom filter density
    pub bloom_bits_per_key: u32,
}

impl Default for SSTableOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            compression: Compression::None,
            bloom_bits_per_key: DEFAULT_BITS_PER_KEY,
        }
    }
}

/// SSTable writer - creates new SSTable files
pub struct SSTableWriter {
    /// Output file path
    path: PathBuf,
    /// Buffered writer
    writer: BufWriter<File>,
    /// Namespace recorded in the footer
    namespace: NamespaceId,
    /// Build options
    options: SSTableOptions,
    /// Current position in file
    position: u64,
    /// Index entries
    index: Vec<IndexEntry>,
    /// Current block buffer
    block_buffer: Vec<u8>,
    /// First key of current block
    current_block_first_key: Option<Vec<u8>>,
    /// Last entry added, for order checks and block bounds
    last_entry: Option<(Vec<u8>, SequenceNumber)>,
    /// Distinct user keys for the bloom filter
    bloom_keys: Vec<Vec<u8>>,
    /// Entry count
    entry_count: u64,
    /// Tombstone count
    tombstone_count: u64,
    /// Minimum key
    min_key: Option<Vec<u8>>,
    /// Sequence range
    min_sequence: SequenceNumber,
    max_sequence: SequenceNumber,
}

impl SSTableWriter {
    /// Create a new SSTable writer
    pub fn new(
        path: impl AsRef<Path>,
        namespace: NamespaceId,
        options: SSTableOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            namespace,
            options,
            position: 0,
            index: Vec::new(),
            block_buffer: Vec::with_capacity(options.block_size),
            current_block_first_key: None,
            last_entry: None,
            bloom_keys: Vec::new(),
            entry_count: 0,
            tombstone_count: 0,
            min_key: None,
            min_sequence: SequenceNumber::MAX,
            max_sequence: 0,
        })
    }

    /// Add an entry to the SSTable
    ///
    /// Entries must arrive in `(key asc, sequence desc)` order.
    pub fn add(&mut self, entry: SSTableEntry) -> Result<()> {
        if let Some((last_key, last_seq)) = &self.last_entry {
            if (last_key.as_slice(), Reverse(*last_seq)) >= entry.order_key() {
                return Err(Error::InvalidState(format!(
                    "SSTable entries out of order at key {:?} seq {}",
                    entry.key, entry.sequence
                )));
            }
        }

        let encoded =
            bincode::serialize(&entry).map_err(|e| Error::Serialization(e.to_string()))?;
        let len = section_len(encoded.len(), "SSTable entry")?;

        // Track min key and distinct keys
        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        let new_key = self
            .last_entry
            .as_ref()
            .map_or(true, |(last_key, _)| *last_key != entry.key);
        if new_key {
            self.bloom_keys.push(entry.key.clone());
        }

        // Track first key of block
        if self.current_block_first_key.is_none() {
            self.current_block_first_key = Some(entry.key.clone());
        }

        // Write length prefix + entry
        self.block_buffer.extend_from_slice(&len.to_le_bytes());
        self.block_buffer.extend_from_slice(&encoded);

        self.entry_count += 1;
        if entry.is_tombstone() {
            self.tombstone_count += 1;
        }
        self.min_sequence = self.min_sequence.min(entry.sequence);
        self.max_sequence = self.max_sequence.max(entry.sequence);
        self.last_entry = Some((entry.key, entry.sequence));

        // Flush block if it exceeds threshold
        if self.block_buffer.len() >= self.options.block_size {
            self.flush_block()?;
        }

        Ok(())
    }

    /// Bytes written so far, pending block included
    pub fn estimated_size(&self) -> u64 {
        self.position + self.block_buffer.len() as u64
    }

    /// Number of entries added
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Flush the current block to disk
    fn flush_block(&mut self) -> Result<()> {
        if self.block_buffer.is_empty() {
            return Ok(());
        }

        let stored = compress(&self.block_buffer, self.options.compression)?;
        let size = section_len(stored.len().saturating_add(4), "SSTable block")?; // +4 for CRC
        let crc = crc32fast::hash(&stored);

        // Create index entry
        if let (Some(first_key), Some((last_key, _))) =
            (self.current_block_first_key.take(), self.last_entry.as_ref())
        {
            self.index.push(IndexEntry {
                first_key,
                last_key: last_key.clone(),
                offset: self.position,
                size,
            });
        }

        // Write block data
        self.writer.write_all(&stored)?;
        self.position += stored.len() as u64;

        // Write block CRC
        self.writer.write_all(&crc.to_le_bytes())?;
        self.position += 4;

        self.block_buffer.clear();

        Ok(())
    }

    /// Finish writing, fsync and close the SSTable
    pub fn finish(mut self) -> Result<SSTableMeta> {
        // Flush any remaining data
        self.flush_block()?;

        // Write index block
        let index_offset = self.position;
        let index_encoded =
            bincode::serialize(&self.index).map_err(|e| Error::Serialization(e.to_string()))?;
        let index_size = section_len(index_encoded.len(), "SSTable index")?;
        self.writer.write_all(&index_encoded)?;
        self.position += index_size as u64;

        // Write bloom block
        let mut bloom = BloomFilter::new(self.bloom_keys.len(), self.options.bloom_bits_per_key);
        for key in &self.bloom_keys {
            bloom.insert(key);
        }
        let bloom_encoded = bloom.serialize();
        let bloom_offset = self.position;
        let bloom_size = section_len(bloom_encoded.len(), "SSTable bloom filter")?;
        self.writer.write_all(&bloom_encoded)?;
        self.position += bloom_size as u64;

        let min_key = self.min_key.take().unwrap_or_default();
        let max_key = self
            .last_entry
            .as_ref()
            .map(|(k, _)| k.clone())
            .unwrap_or_default();
        let (min_sequence, max_sequence) = if self.entry_count == 0 {
            (0, 0)
        } else {
            (self.min_sequence, self.max_sequence)
        };

        let footer_data = SSTableFooter {
            magic: magic::SSTABLE,
            version: format_version::SSTABLE.current,
            namespace: self.namespace,
            compression: self.options.compression.as_u8(),
            index_offset,
            index_size,
            index_crc: crc32fast::hash(&index_encoded),
            bloom_offset,
            bloom_size,
            bloom_crc: crc32fast::hash(&bloom_encoded),
            entry_count: self.entry_count,
            tombstone_count: self.tombstone_count,
            min_key: min_key.clone(),
            max_key: max_key.clone(),
            min_sequence,
            max_sequence,
            crc: 0, // Will be set after computing CRC
        };

        let footer_encoded =
            bincode::serialize(&footer_data).map_err(|e| Error::Serialization(e.to_string()))?;
        let footer_crc = crc32fast::hash(&footer_encoded);

        // Write footer with correct CRC
        let final_footer = SSTableFooter {
            crc: footer_crc,
            ..footer_data
        };
        let final_footer_encoded =
            bincode::serialize(&final_footer).map_err(|e| Error::Serialization(e.to_string()))?;

        // Write footer length + footer
        let footer_len = section_len(final_footer_encoded.len(), "SSTable footer")?;
        self.writer.write_all(&final_footer_encoded)?;
        self.writer.write_all(&footer_len.to_le_bytes())?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        let file_size = self.position + final_footer_encoded.len() as u64 + 4;

        Ok(SSTableMeta {
            path: self.path,
            namespace: self.namespace,
            level: 0,
            min_key,
            max_key,
            entry_count: self.entry_count,
            file_size,
            min_sequence,
            max_sequence,
            compression: self.options.compression,
        })
    }
}

/// SSTable reader - reads from existing SSTable files
///
/// Safe to share between threads; block reads serialize on the file handle.
pub struct SSTableReader {
    /// Path to the SSTable file
    path: PathBuf,
    /// The file handle
    file: Mutex<BufReader<File>>,
    /// Index entries
    index: Vec<IndexEntry>,
    /// Bloom filter over user keys
    bloom: BloomFilter,
    /// Footer metadata
    footer: SSTableFooter,
    /// Decoded compression tag
    compression: Compression,
    /// File size
    file_size: u64,
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("namespace", &self.footer.namespace)
            .field("entries", &self.footer.entry_count)
            .finish()
    }
}

impl SSTableReader {
    /// Open an SSTable file for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        // Get file size
        let file_size = file.metadata()?.len();

        if file_size < 4 {
            return Err(Error::Corruption(format!(
                "SSTable too small: {}",
                path.display()
            )));
        }

        // Read footer length (last 4 bytes)
        file.seek(SeekFrom::End(-4))?;
        let mut footer_len_buf = [0u8; 4];
        file.read_exact(&mut footer_len_buf)?;
        let footer_len = u32::from_le_bytes(footer_len_buf) as u64;
        if footer_len + 4 > file_size {
            return Err(Error::Corruption(format!(
                "SSTable footer length {} exceeds file size {}",
                footer_len, file_size
            )));
        }

        // Read footer
        file.seek(SeekFrom::Start(file_size - 4 - footer_len))?;
        let mut footer_buf = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer_buf)?;

        let footer: SSTableFooter = bincode::deserialize(&footer_buf)
            .map_err(|e| Error::Corruption(format!("SSTable footer: {}", e)))?;

        // Validate magic number
        if footer.magic != magic::SSTABLE {
            return Err(Error::Corruption("Invalid SSTable magic number".into()));
        }
        if !format_version::SSTABLE.can_read(footer.version) {
            return Err(Error::Corruption(format!(
                "Unsupported SSTable format version {}",
                footer.version
            )));
        }
        let unsigned = SSTableFooter {
            crc: 0,
            ..footer.clone()
        };
        let unsigned =
            bincode::serialize(&unsigned).map_err(|e| Error::Serialization(e.to_string()))?;
        if crc32fast::hash(&unsigned) != footer.crc {
            return Err(Error::Corruption("SSTable footer CRC mismatch".into()));
        }
        let compression = Compression::from_u8(footer.compression).ok_or_else(|| {
            Error::Corruption(format!("Unknown compression tag {}", footer.compression))
        })?;

        // Read index
        let index_buf = read_section(
            &mut file,
            footer.index_offset,
            footer.index_size,
            footer.index_crc,
            "index",
        )?;
        let index: Vec<IndexEntry> = bincode::deserialize(&index_buf)
            .map_err(|e| Error::Corruption(format!("SSTable index: {}", e)))?;

        // Read bloom filter
        let bloom_buf = read_section(
            &mut file,
            footer.bloom_offset,
            footer.bloom_size,
            footer.bloom_crc,
            "bloom",
        )?;
        let bloom = BloomFilter::deserialize(&bloom_buf)?;

        Ok(Self {
            path,
            file: Mutex::new(BufReader::new(file)),
            index,
            bloom,
            footer,
            compression,
            file_size,
        })
    }

    /// Newest version of `key` with a sequence at or below `sequence`
    pub fn get(
        &self,
        key: &[u8],
        sequence: SequenceNumber,
        verify_checksums: bool,
    ) -> Result<Option<SSTableEntry>> {
        if !self.might_contain(key) {
            return Ok(None);
        }

        // Versions of one key may straddle block boundaries
        let start = self
            .index
            .partition_point(|block| block.last_key.as_slice() < key);
        for block_idx in start..self.index.len() {
            if self.index[block_idx].first_key.as_slice() > key {
                break;
            }
            for entry in self.read_block(block_idx, verify_checksums)? {
                match entry.key.as_slice().cmp(key) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Greater => return Ok(None),
                    std::cmp::Ordering::Equal if entry.sequence <= sequence => {
                        return Ok(Some(entry))
                    }
                    std::cmp::Ordering::Equal => continue,
                }
            }
        }

        Ok(None)
    }

    /// Smallest user key at or after `target` (strictly after if `!inclusive`)
    pub fn next_key(
        &self,
        target: &[u8],
        inclusive: bool,
        verify_checksums: bool,
    ) -> Result<Option<Vec<u8>>> {
        let block_idx = self.index.partition_point(|block| {
            if inclusive {
                block.last_key.as_slice() < target
            } else {
                block.last_key.as_slice() <= target
            }
        });
        if block_idx >= self.index.len() {
            return Ok(None);
        }

        Ok(self
            .read_block(block_idx, verify_checksums)?
            .into_iter()
            .find(|e| {
                if inclusive {
                    e.key.as_slice() >= target
                } else {
                    e.key.as_slice() > target
                }
            })
            .map(|e| e.key))
    }

    /// Largest user key strictly before `target`, or the largest key overall
    pub fn prev_key(
        &self,
        target: Option<&[u8]>,
        verify_checksums: bool,
    ) -> Result<Option<Vec<u8>>> {
        let Some(target) = target else {
            return Ok((self.footer.entry_count > 0).then(|| self.footer.max_key.clone()));
        };

        let block_idx = self
            .index
            .partition_point(|block| block.first_key.as_slice() < target);
        if block_idx == 0 {
            return Ok(None);
        }

        Ok(self
            .read_block(block_idx - 1, verify_checksums)?
            .into_iter()
            .rev()
            .find(|e| e.key.as_slice() < target)
            .map(|e| e.key))
    }

    /// Read a data block by index
    fn read_block(&self, block_idx: usize, verify_checksums: bool) -> Result<Vec<SSTableEntry>> {
        let index_entry = &self.index[block_idx];
        if index_entry.size < 4 {
            return Err(Error::Corruption("SSTable block too small".into()));
        }

        let data_size = index_entry.size as usize - 4; // Subtract CRC size
        let mut data_buf = vec![0u8; data_size];
        let mut crc_buf = [0u8; 4];
        {
            let mut file = self.file.lock().map_err(|_| Error::LockPoisoned)?;
            file.seek(SeekFrom::Start(index_entry.offset))?;
            file.read_exact(&mut data_buf)?;
            file.read_exact(&mut crc_buf)?;
        }

        // Verify CRC
        if verify_checksums {
            let stored_crc = u32::from_le_bytes(crc_buf);
            let computed_crc = crc32fast::hash(&data_buf);
            if stored_crc != computed_crc {
                return Err(Error::Corruption(format!(
                    "Block CRC mismatch in {} at offset {}",
                    self.path.display(),
                    index_entry.offset
                )));
            }
        }

        let data_buf = decompress(&data_buf, self.compression)?;

        // Parse entries from block
        let mut entries = Vec::new();
        let mut offset = 0;

        while offset + 4 <= data_buf.len() {
            let len = u32::from_le_bytes([
                data_buf[offset],
                data_buf[offset + 1],
                data_buf[offset + 2],
                data_buf[offset + 3],
            ]) as usize;
            offset += 4;

            if offset + len > data_buf.len() {
                return Err(Error::Corruption("Truncated SSTable entry".into()));
            }

            let entry: SSTableEntry = bincode::deserialize(&data_buf[offset..offset + len])
                .map_err(|e| Error::Corruption(format!("SSTable entry: {}", e)))?;
            entries.push(entry);
            offset += len;
        }

        Ok(entries)
    }

    /// Get metadata about this SSTable
    pub fn metadata(&self, level: u32) -> SSTableMeta {
        SSTableMeta {
            path: self.path.clone(),
            namespace: self.footer.namespace,
            level,
            min_key: self.footer.min_key.clone(),
            max_key: self.footer.max_key.clone(),
            entry_count: self.footer.entry_count,
            file_size: self.file_size,
            min_sequence: self.footer.min_sequence,
            max_sequence: self.footer.max_sequence,
            compression: self.compression,
        }
    }

    /// Footer as read from disk
    pub fn footer(&self) -> &SSTableFooter {
        &self.footer
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Namespace of the stored versions
    pub fn namespace(&self) -> NamespaceId {
        self.footer.namespace
    }

    /// File size in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Check if a key might be in this SSTable (range + bloom check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.footer.entry_count > 0
            && key >= self.footer.min_key.as_slice()
            && key <= self.footer.max_key.as_slice()
            && self.bloom.may_contain(key)
    }

    /// Iterate over all entries in the SSTable
    pub fn iter(&self) -> SSTableIterator<'_> {
        SSTableIterator {
            reader: self,
            block_idx: 0,
            block_entries: Vec::new().into_iter(),
        }
    }
}

/// On-disk `u32` length of a section, refusing sizes that would wrap
fn section_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::Storage(format!("{} of {} bytes is too large", what, len)))
}

fn read_section(file: &mut File, offset: u64, size: u32, crc: u32, what: &str) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    if crc32fast::hash(&buf) != crc {
        return Err(Error::Corruption(format!("SSTable {} CRC mismatch", what)));
    }
    Ok(buf)
}

/// Iterator over SSTable entries
pub struct SSTableIterator<'a> {
    reader: &'a SSTableReader,
    block_idx: usize,
    block_entries: std::vec::IntoIter<SSTableEntry>,
}

impl<'a> SSTableIterator<'a> {
    /// Get the next entry
    pub fn next_entry(&mut self) -> Result<Option<SSTableEntry>> {
        loop {
            // If we have entries in the current block, return the next one
            if let Some(entry) = self.block_entries.next() {
                return Ok(Some(entry));
            }

            // Load the next block
            if self.block_idx >= self.reader.index.len() {
                return Ok(None);
            }

            self.block_entries = self.reader.read_block(self.block_idx, true)?.into_iter();
            self.block_idx += 1;
        }
    }
}

/// Delete an SSTable file
pub fn delete_sstable(path: impl AsRef<Path>) -> Result<()> {
    fs::remove_file(path)?;
    Ok(())
}
