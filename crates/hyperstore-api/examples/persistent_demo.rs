//! Demonstrates hyperstore's persistent, namespaced storage.
//!
//! Run with: cargo run -p hyperstore --example persistent_demo

use hyperstore::{Compression, Database, NamespaceId, WriteBatch};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = "./demo_atomspace";

    println!("=== hyperstore Persistent Database Demo ===\n");

    // Clean up any previous demo data
    if Path::new(db_path).exists() {
        std::fs::remove_dir_all(db_path)?;
        println!("Cleaned up previous demo data\n");
    }

    // PART 1: Write a small hypergraph
    println!("PART 1: Writing nodes and links...");
    {
        let db = Database::open(db_path, true, Compression::Balanced)?;

        let mut batch = WriteBatch::new();
        batch.put_in(NamespaceId::NODES, b"node:1", b"ConceptNode cat");
        batch.put_in(NamespaceId::NODES, b"node:2", b"ConceptNode animal");
        batch.put_in(NamespaceId::LINKS, b"link:1", b"InheritanceLink node:1 node:2");
        batch.put_in(NamespaceId::OUTGOING, b"link:1", b"node:1,node:2");
        batch.put_in(NamespaceId::INCOMING, b"node:1", b"link:1");
        batch.put_in(NamespaceId::INCOMING, b"node:2", b"link:1");
        batch.put_in(NamespaceId::TRUTH_VALUES, b"link:1", b"0.9,0.8");
        let sequence = db.write(&batch)?;

        println!("   Committed {} operations at sequence {}", batch.count(), sequence);
        db.close()?;
    }
    println!("   Database closed\n");

    // PART 2: Reopen, read through a snapshot while writing
    println!("PART 2: Reopening and reading through a snapshot...");
    {
        let db = Database::open(db_path, false, Compression::Balanced)?;
        let snapshot = db.snapshot()?;

        db.put(NamespaceId::TRUTH_VALUES, b"link:1", b"0.95,0.9")?;

        let before = snapshot.get(NamespaceId::TRUTH_VALUES, b"link:1")?;
        let after = db.get(NamespaceId::TRUTH_VALUES, b"link:1")?;
        println!(
            "   Truth value at snapshot: {:?}, now: {:?}",
            before.map(|v| String::from_utf8_lossy(&v).to_string()),
            after.map(|v| String::from_utf8_lossy(&v).to_string())
        );
        snapshot.release();

        println!("   Nodes:");
        let mut iter = db.iter(NamespaceId::NODES)?;
        iter.seek_to_first()?;
        while iter.valid() {
            println!(
                "     {} => {}",
                String::from_utf8_lossy(iter.key()?),
                String::from_utf8_lossy(iter.value()?)
            );
            iter.next()?;
        }
    }
    println!();

    // PART 3: Maintenance
    println!("PART 3: Flushing and inspecting...");
    {
        let db = Database::open(db_path, false, Compression::Balanced)?;
        db.flush()?;
        db.compact_range(NamespaceId::NODES)?;

        for property in [
            "hyperstore.estimate-num-keys",
            "hyperstore.num-files-at-level1",
            "hyperstore.total-sst-files-size",
        ] {
            println!("   {} = {:?}", property, db.property(property)?);
        }
        println!("\n{}", db.stats()?);
    }

    // Clean up demo
    std::fs::remove_dir_all(db_path)?;
    println!("\nCleaned up demo database");
    println!("\n=== Demo Complete! ===");

    Ok(())
}
