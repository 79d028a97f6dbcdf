// Common test utilities for hyperstore integration tests

use hyperstore::{Database, DatabaseOptions};
use std::path::PathBuf;
use tempfile::TempDir;

/// Test fixture owning a temporary database directory
pub struct DbFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl DbFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("db");
        Self { temp_dir, path }
    }

    pub fn open(&self) -> Database {
        self.open_with(DatabaseOptions::default())
    }

    pub fn open_with(&self, options: DatabaseOptions) -> Database {
        Database::open_with_options(&self.path, options).expect("Failed to open database")
    }
}

/// Options that flush and compact after very little data
#[allow(dead_code)]
pub fn small_options() -> DatabaseOptions {
    let mut options = DatabaseOptions::default().with_memtable_size(2048);
    options.compaction.level0_trigger = 2;
    options
}

/// Zero-padded key so byte order matches numeric order
#[allow(dead_code)]
pub fn key(prefix: &str, i: usize) -> Vec<u8> {
    format!("{}:{:05}", prefix, i).into_bytes()
}
