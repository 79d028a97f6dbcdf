//! Manifest - Metadata about current SSTables and database state
//!
//! The manifest tracks which SSTable files are live, their levels, the
//! highest sequence already persisted in them and the namespace registry.
//! It is rewritten as a whole on every change: the new state goes to
//! `MANIFEST.tmp`, is fsynced and then renamed over `MANIFEST`, so a crash
//! leaves either the old or the new state on disk, never a mix.
//!
//! ## File Format
//!
//! ```text
//! [magic u32][version u16][payload len u32][bincode payload][crc32 u32]
//! ```

use crate::sstable::SSTableMeta;
use hyperstore_core::format_version::{self, magic};
use hyperstore_core::{Compression, Error, NamespaceId, Result, SequenceNumber};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manifest file name
pub const MANIFEST_FILE: &str = "MANIFEST";
/// Scratch file used while rewriting
pub const MANIFEST_TMP: &str = "MANIFEST.tmp";

const HEADER_LEN: usize = 10;

/// SSTable entry in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSSTable {
    /// Namespace of the stored versions
    pub namespace: NamespaceId,
    /// Level in the LSM tree
    pub level: u32,
    /// File name inside the table directory
    pub file_name: String,
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
    /// Compression tag of the data blocks
    pub compression: u8,
}

impl ManifestSSTable {
    /// Describe a freshly written table
    pub fn from_meta(meta: &SSTableMeta) -> Self {
        Self {
            namespace: meta.namespace,
            level: meta.level,
            file_name: meta
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            min_key: meta.min_key.clone(),
            max_key: meta.max_key.clone(),
            entry_count: meta.entry_count,
            file_size: meta.file_size,
            min_sequence: meta.min_sequence,
            max_sequence: meta.max_sequence,
            compression: meta.compression.as_u8(),
        }
    }

    /// Convert to SSTableMeta, resolving the file inside `table_dir`
    pub fn to_meta(&self, table_dir: &Path) -> SSTableMeta {
        SSTableMeta {
            path: table_dir.join(&self.file_name),
            namespace: self.namespace,
            level: self.level,
            min_key: self.min_key.clone(),
            max_key: self.max_key.clone(),
            entry_count: self.entry_count,
            file_size: self.file_size,
            min_sequence: self.min_sequence,
            max_sequence: self.max_sequence,
            compression: Compression::from_u8(self.compression).unwrap_or_default(),
        }
    }
}

/// Manifest snapshot (complete state)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    /// Every sequence at or below this is persisted in SSTables
    pub last_sequence: SequenceNumber,
    /// Next number handed out for a table file
    pub next_file_number: u64,
    /// Namespace names in id order
    pub namespaces: Vec<String>,
    /// All live SSTables
    pub sstables: Vec<ManifestSSTable>,
    /// Number of compactions ever completed
    pub compaction_count: u64,
}

/// A change applied atomically to the manifest
#[derive(Debug, Clone, Default)]
pub struct ManifestEdit {
    /// Tables to add
    pub added: Vec<ManifestSSTable>,
    /// File names of tables to drop
    pub removed: Vec<String>,
    /// New persisted sequence, if it moved
    pub last_sequence: Option<SequenceNumber>,
    /// Replacement namespace list, if it changed
    pub namespaces: Option<Vec<String>>,
    /// Whether this edit completes a compaction
    pub compaction: bool,
}

/// Manifest manager - tracks database state
#[derive(Debug)]
pub struct Manifest {
    /// Database directory
    dir: PathBuf,
    /// Current snapshot
    snapshot: ManifestSnapshot,
}

impl Manifest {
    /// Whether `dir` holds a manifest
    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }

    /// Create and persist an empty manifest
    pub fn create(dir: impl AsRef<Path>, namespaces: Vec<String>) -> Result<Self> {
        let manifest = Self {
            dir: dir.as_ref().to_path_buf(),
            snapshot: ManifestSnapshot {
                last_sequence: 0,
                next_file_number: 1,
                namespaces,
                sstables: Vec::new(),
                compaction_count: 0,
            },
        };
        manifest.write(&manifest.snapshot)?;
        Ok(manifest)
    }

    /// Load the manifest from `dir`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        // A leftover scratch file is an interrupted rewrite; the old state wins
        let tmp = dir.join(MANIFEST_TMP);
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }

        let contents = fs::read(dir.join(MANIFEST_FILE))?;
        let snapshot = decode(&contents)?;
        debug!(
            sstables = snapshot.sstables.len(),
            last_sequence = snapshot.last_sequence,
            "manifest loaded"
        );
        Ok(Self { dir, snapshot })
    }

    /// Apply `edit` and persist the result
    ///
    /// On error the in-memory state is left unchanged.
    pub fn apply(&mut self, edit: ManifestEdit) -> Result<()> {
        let mut next = self.snapshot.clone();

        next.sstables
            .retain(|s| !edit.removed.iter().any(|r| *r == s.file_name));
        next.sstables.extend(edit.added);
        if let Some(sequence) = edit.last_sequence {
            next.last_sequence = next.last_sequence.max(sequence);
        }
        if let Some(namespaces) = edit.namespaces {
            next.namespaces = namespaces;
        }
        if edit.compaction {
            next.compaction_count += 1;
        }

        self.write(&next)?;
        self.snapshot = next;
        Ok(())
    }

    /// Reserve a table file number
    ///
    /// The counter is persisted with the next edit; files with unpersisted
    /// numbers are orphans that recovery deletes.
    pub fn allocate_file_number(&mut self) -> u64 {
        let number = self.snapshot.next_file_number;
        self.snapshot.next_file_number += 1;
        number
    }

    fn write(&self, snapshot: &ManifestSnapshot) -> Result<()> {
        let encoded = encode(snapshot)?;
        let tmp = self.dir.join(MANIFEST_TMP);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(MANIFEST_FILE))?;
        sync_dir(&self.dir);
        Ok(())
    }

    /// Get the persisted sequence number
    pub fn last_sequence(&self) -> SequenceNumber {
        self.snapshot.last_sequence
    }

    /// Registered namespace names
    pub fn namespaces(&self) -> &[String] {
        &self.snapshot.namespaces
    }

    /// Get all SSTables at a given level
    pub fn sstables_at_level(&self, level: u32) -> Vec<&ManifestSSTable> {
        self.snapshot
            .sstables
            .iter()
            .filter(|s| s.level == level)
            .collect()
    }

    /// Get all SSTables
    pub fn all_sstables(&self) -> &[ManifestSSTable] {
        &self.snapshot.sstables
    }

    /// Get total size of all SSTables
    pub fn total_size(&self) -> u64 {
        self.snapshot.sstables.iter().map(|s| s.file_size).sum()
    }

    /// Number of completed compactions
    pub fn compaction_count(&self) -> u64 {
        self.snapshot.compaction_count
    }

    /// The full persisted state
    pub fn snapshot(&self) -> &ManifestSnapshot {
        &self.snapshot
    }
}

fn encode(snapshot: &ManifestSnapshot) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(snapshot).map_err(|e| Error::Serialization(e.to_string()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
    out.extend_from_slice(&magic::MANIFEST.to_le_bytes());
    out.extend_from_slice(&format_version::MANIFEST.current.to_le_bytes());
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Storage(format!("manifest of {} bytes is too large", payload.len())))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(out)
}

fn decode(data: &[u8]) -> Result<ManifestSnapshot> {
    if data.len() < HEADER_LEN + 4 {
        return Err(Error::Corruption("manifest too short".into()));
    }
    let file_magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if file_magic != magic::MANIFEST {
        return Err(Error::Corruption("invalid manifest magic".into()));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if !format_version::MANIFEST.can_read(version) {
        return Err(Error::Corruption(format!(
            "unsupported manifest format version {}",
            version
        )));
    }
    let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    if data.len() != HEADER_LEN + len + 4 {
        return Err(Error::Corruption("manifest length mismatch".into()));
    }
    let payload = &data[HEADER_LEN..HEADER_LEN + len];
    let crc_bytes = &data[HEADER_LEN + len..];
    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if crc32fast::hash(payload) != stored_crc {
        return Err(Error::Corruption("manifest CRC mismatch".into()));
    }
    bincode::deserialize(payload).map_err(|e| Error::Corruption(format!("manifest: {}", e)))
}

/// Make a rename durable. Not every platform can open a directory; there
/// the rename is as durable as the OS makes it.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names() -> Vec<String> {
        vec!["default".to_string(), "nodes".to_string()]
    }

    fn table(file_name: &str, level: u32) -> ManifestSSTable {
        ManifestSSTable {
            namespace: NamespaceId::NODES,
            level,
            file_name: file_name.to_string(),
            min_key: b"a".to_vec(),
            max_key: b"z".to_vec(),
            entry_count: 100,
            file_size: 1024,
            min_sequence: 1,
            max_sequence: 100,
            compression: 0,
        }
    }

    #[test]
    fn test_manifest_create() {
        let dir = tempdir().unwrap();
        assert!(!Manifest::exists(dir.path()));

        let manifest = Manifest::create(dir.path(), names()).unwrap();
        assert!(Manifest::exists(dir.path()));
        assert_eq!(manifest.last_sequence(), 0);
        assert!(manifest.all_sstables().is_empty());
        assert_eq!(manifest.namespaces(), names().as_slice());
    }

    #[test]
    fn test_manifest_edit_survives_reload() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::create(dir.path(), names()).unwrap();
        let number = manifest.allocate_file_number();
        assert_eq!(number, 1);

        manifest
            .apply(ManifestEdit {
                added: vec![table("000001.sst", 0)],
                last_sequence: Some(100),
                ..Default::default()
            })
            .unwrap();

        let reloaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(reloaded.snapshot(), manifest.snapshot());
        assert_eq!(reloaded.last_sequence(), 100);
        assert_eq!(reloaded.snapshot().next_file_number, 2);
        assert_eq!(reloaded.sstables_at_level(0).len(), 1);
        assert_eq!(reloaded.total_size(), 1024);
    }

    #[test]
    fn test_manifest_compaction_edit() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::create(dir.path(), names()).unwrap();
        manifest
            .apply(ManifestEdit {
                added: vec![table("a.sst", 0), table("b.sst", 0)],
                ..Default::default()
            })
            .unwrap();

        manifest
            .apply(ManifestEdit {
                added: vec![table("c.sst", 1)],
                removed: vec!["a.sst".into(), "b.sst".into()],
                compaction: true,
                ..Default::default()
            })
            .unwrap();

        assert!(manifest.sstables_at_level(0).is_empty());
        assert_eq!(manifest.sstables_at_level(1).len(), 1);
        assert_eq!(manifest.compaction_count(), 1);
    }

    #[test]
    fn test_manifest_sequence_never_moves_back() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::create(dir.path(), names()).unwrap();
        manifest
            .apply(ManifestEdit {
                last_sequence: Some(50),
                ..Default::default()
            })
            .unwrap();
        manifest
            .apply(ManifestEdit {
                last_sequence: Some(10),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(manifest.last_sequence(), 50);
    }

    #[test]
    fn test_manifest_ignores_stale_tmp() {
        let dir = tempdir().unwrap();
        Manifest::create(dir.path(), names()).unwrap();
        fs::write(dir.path().join(MANIFEST_TMP), b"half-written").unwrap();

        let manifest = Manifest::load(dir.path()).unwrap();
        assert_eq!(manifest.namespaces().len(), 2);
        assert!(!dir.path().join(MANIFEST_TMP).exists());
    }

    #[test]
    fn test_manifest_detects_corruption() {
        let dir = tempdir().unwrap();
        Manifest::create(dir.path(), names()).unwrap();

        let path = dir.path().join(MANIFEST_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(Manifest::load(dir.path()), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_meta_conversion() {
        let dir = tempdir().unwrap();
        let meta = table("000007.sst", 1).to_meta(dir.path());
        assert_eq!(meta.path, dir.path().join("000007.sst"));
        assert_eq!(ManifestSSTable::from_meta(&meta), table("000007.sst", 1));
    }
}
