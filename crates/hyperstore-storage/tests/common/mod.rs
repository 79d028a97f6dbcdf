// Common test utilities for storage engine integration tests

use hyperstore_core::{NamespaceId, ReadOptions, SequenceNumber, WriteOp, WriteOptions};
use hyperstore_storage::{StorageConfig, StorageEngine};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test fixture owning a temporary database directory
pub struct EngineFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub db_path: PathBuf,
}

impl EngineFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("db");
        Self { temp_dir, db_path }
    }

    pub fn open(&self, config: StorageConfig) -> StorageEngine {
        StorageEngine::open(&self.db_path, config).expect("Failed to open engine")
    }

    #[allow(dead_code)]
    pub fn table_dir(&self) -> PathBuf {
        self.db_path.join("sst")
    }
}

/// Config that flushes and compacts after very little data
#[allow(dead_code)]
pub fn tiny_config() -> StorageConfig {
    let mut config = StorageConfig {
        memtable_size: 1024,
        ..Default::default()
    };
    config.compaction.level0_trigger = 2;
    config
}

pub fn put(engine: &StorageEngine, ns: NamespaceId, key: &[u8], value: &[u8]) -> SequenceNumber {
    engine
        .write(
            vec![WriteOp::Put {
                namespace: ns,
                key: key.to_vec(),
                value: value.to_vec(),
            }],
            WriteOptions::default(),
        )
        .expect("Failed to put")
}

#[allow(dead_code)]
pub fn delete(engine: &StorageEngine, ns: NamespaceId, key: &[u8]) -> SequenceNumber {
    engine
        .write(
            vec![WriteOp::Delete {
                namespace: ns,
                key: key.to_vec(),
            }],
            WriteOptions::default(),
        )
        .expect("Failed to delete")
}

pub fn get(engine: &StorageEngine, ns: NamespaceId, key: &[u8]) -> Option<Vec<u8>> {
    engine
        .get(ns, key, &ReadOptions::default(), None)
        .expect("Failed to get")
}

#[allow(dead_code)]
pub fn get_at(
    engine: &StorageEngine,
    ns: NamespaceId,
    key: &[u8],
    snapshot: SequenceNumber,
) -> Option<Vec<u8>> {
    engine
        .get(ns, key, &ReadOptions::default(), Some(snapshot))
        .expect("Failed to get at snapshot")
}

/// Files with the given extension directly inside `dir`
#[allow(dead_code)]
pub fn files_with_extension(dir: &Path, extension: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read directory")
        .filter_map(|entry| entry.ok().and_then(|e| e.file_name().to_str().map(String::from)))
        .filter(|name| name.ends_with(extension))
        .collect();
    names.sort();
    names
}
