//! Shows the engine's tracing output while it opens, flushes and compacts.
//!
//! Run with: RUST_LOG=debug cargo run -p hyperstore --example logging_demo

use hyperstore::logging::LogConfig;
use hyperstore::{Database, DatabaseOptions, NamespaceId};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = LogConfig::info().init()?;

    println!("=== hyperstore Logging Demo ===\n");

    let dir = std::env::temp_dir().join("hyperstore_logging_demo");
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }

    // Logs "creating new database" and "database opened"
    let db = Database::open_with_options(&dir, DatabaseOptions::default())?;

    println!("\n1. Writing nodes...");
    for i in 0..100u32 {
        let key = format!("node:{:04}", i);
        db.put(NamespaceId::NODES, key.as_bytes(), b"ConceptNode")?;
    }

    println!("\n2. Flushing (logs \"memtable flushed\")...");
    db.flush()?;

    println!("\n3. Compacting (logs compaction summary)...");
    db.compact_range(NamespaceId::NODES)?;

    println!("\n4. Closing...");
    db.close()?;

    std::fs::remove_dir_all(&dir)?;
    println!("\n=== Demo Complete ===");
    Ok(())
}
