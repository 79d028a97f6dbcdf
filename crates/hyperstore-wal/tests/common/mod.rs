// Common test utilities for WAL integration tests

use hyperstore_core::{NamespaceId, WriteOp};
use hyperstore_wal::{SyncMode, WalConfig, WalRecord};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Test fixture that creates a temporary WAL directory
pub struct WalTestFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub wal_path: PathBuf,
}

impl WalTestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let wal_path = temp_dir.path().join("wal");
        fs::create_dir_all(&wal_path).expect("Failed to create WAL directory");

        Self { temp_dir, wal_path }
    }

    pub fn wal_dir(&self) -> &PathBuf {
        &self.wal_path
    }

    #[allow(dead_code)]
    pub fn config(&self, sync_mode: SyncMode, max_segment_size: u64) -> WalConfig {
        WalConfig {
            wal_dir: self.wal_path.clone(),
            sync_mode,
            max_segment_size,
        }
    }

    /// Segment file names, sorted
    #[allow(dead_code)]
    pub fn list_segments(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.wal_path)
            .expect("Failed to read WAL directory")
            .filter_map(|entry| {
                entry
                    .ok()
                    .and_then(|e| e.file_name().to_str().map(String::from))
            })
            .filter(|name| name.ends_with(".log"))
            .collect();
        names.sort();
        names
    }

    #[allow(dead_code)]
    pub fn segment_path(&self, name: &str) -> PathBuf {
        self.wal_path.join(name)
    }
}

impl Default for WalTestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A batch that writes `count` node entries under `seq`
#[allow(dead_code)]
pub fn node_batch(seq: u64, count: usize) -> WalRecord {
    let ops = (0..count)
        .map(|i| WriteOp::Put {
            namespace: NamespaceId::NODES,
            key: format!("node:{}:{}", seq, i).into_bytes(),
            value: format!("payload-{}", i).into_bytes(),
        })
        .collect();
    WalRecord::batch(seq, ops)
}
