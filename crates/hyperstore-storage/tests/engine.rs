// Integration tests for flush, compaction and recovery of the storage engine

mod common;

use common::{delete, files_with_extension, get, get_at, put, tiny_config, EngineFixture};
use hyperstore_core::{Compression, NamespaceId, ReadOptions, WriteOp, WriteOptions};
use hyperstore_storage::{Seek, StorageConfig};
use std::fs;
use std::sync::Arc;
use std::thread;

const NODES: NamespaceId = NamespaceId::NODES;
const LINKS: NamespaceId = NamespaceId::LINKS;

#[test]
fn test_namespaces_are_isolated_on_disk() {
    let fixture = EngineFixture::new();
    {
        let engine = fixture.open(StorageConfig::default());
        put(&engine, NODES, b"id", b"node");
        put(&engine, LINKS, b"id", b"link");
        engine.flush().unwrap();
        engine.close().unwrap();
    }

    let engine = fixture.open(StorageConfig::default());
    assert_eq!(get(&engine, NODES, b"id"), Some(b"node".to_vec()));
    assert_eq!(get(&engine, LINKS, b"id"), Some(b"link".to_vec()));
    assert_eq!(get(&engine, NamespaceId::METADATA, b"id"), None);
    // One table per namespace
    assert_eq!(files_with_extension(&fixture.table_dir(), ".sst").len(), 2);
}

#[test]
fn test_compaction_keeps_snapshot_versions() {
    let fixture = EngineFixture::new();
    let engine = fixture.open(StorageConfig::default());

    put(&engine, NODES, b"k", b"v1");
    let snapshot = engine.acquire_snapshot().unwrap();
    put(&engine, NODES, b"k", b"v2");

    engine.compact_range(NODES).unwrap();
    assert_eq!(get_at(&engine, NODES, b"k", snapshot), Some(b"v1".to_vec()));
    assert_eq!(get(&engine, NODES, b"k"), Some(b"v2".to_vec()));
    assert_eq!(engine.stats().unwrap().estimated_keys, 2);

    assert!(engine.release_snapshot(snapshot).unwrap());
    engine.compact_range(NODES).unwrap();
    assert_eq!(get(&engine, NODES, b"k"), Some(b"v2".to_vec()));
    assert_eq!(engine.stats().unwrap().estimated_keys, 1);
}

#[test]
fn test_compaction_drops_deleted_keys() {
    let fixture = EngineFixture::new();
    let engine = fixture.open(StorageConfig::default());

    put(&engine, NODES, b"gone", b"x");
    put(&engine, NODES, b"kept", b"y");
    delete(&engine, NODES, b"gone");
    engine.compact_range(NODES).unwrap();

    assert_eq!(get(&engine, NODES, b"gone"), None);
    assert_eq!(get(&engine, NODES, b"kept"), Some(b"y".to_vec()));
    assert_eq!(engine.stats().unwrap().estimated_keys, 1);
    assert_eq!(
        engine.property("hyperstore.compaction-count").unwrap(),
        Some("1".to_string())
    );
}

#[test]
fn test_automatic_flush_and_compaction() {
    let fixture = EngineFixture::new();
    let engine = fixture.open(tiny_config());

    for i in 0..400u32 {
        let key = format!("node:{:05}", i);
        put(&engine, NODES, key.as_bytes(), &i.to_le_bytes());
    }

    let stats = engine.stats().unwrap();
    assert!(stats.compaction_count > 0, "stats: {}", stats);
    assert!(stats.level_files[0] < 2);

    for i in (0..400u32).step_by(37) {
        let key = format!("node:{:05}", i);
        assert_eq!(get(&engine, NODES, key.as_bytes()), Some(i.to_le_bytes().to_vec()));
    }
}

#[test]
fn test_seek_spans_memtable_and_tables() {
    let fixture = EngineFixture::new();
    let engine = fixture.open(StorageConfig::default());
    let opts = ReadOptions::default();

    put(&engine, NODES, b"a", b"1");
    put(&engine, NODES, b"c", b"3");
    engine.flush().unwrap();
    put(&engine, NODES, b"b", b"2");
    delete(&engine, NODES, b"c");

    let seek = |s| engine.seek(NODES, s, &opts, None).unwrap().map(|(k, _)| k);
    assert_eq!(seek(Seek::First), Some(b"a".to_vec()));
    assert_eq!(seek(Seek::After(b"a")), Some(b"b".to_vec()));
    assert_eq!(seek(Seek::After(b"b")), None);
    assert_eq!(seek(Seek::Last), Some(b"b".to_vec()));
    assert_eq!(seek(Seek::Before(b"b")), Some(b"a".to_vec()));
    assert_eq!(seek(Seek::AtOrAfter(b"bb")), None);
}

#[test]
fn test_recovery_after_flush_and_unflushed_writes() {
    let fixture = EngineFixture::new();
    {
        let engine = fixture.open(StorageConfig::default());
        put(&engine, NODES, b"flushed", b"1");
        engine.flush().unwrap();
        put(&engine, NODES, b"logged", b"2");
        delete(&engine, NODES, b"flushed");
    }

    let engine = fixture.open(StorageConfig::default());
    assert_eq!(get(&engine, NODES, b"flushed"), None);
    assert_eq!(get(&engine, NODES, b"logged"), Some(b"2".to_vec()));
    assert_eq!(engine.latest_sequence(), 3);
}

#[test]
fn test_orphan_tables_removed_on_open() {
    let fixture = EngineFixture::new();
    {
        let engine = fixture.open(StorageConfig::default());
        put(&engine, NODES, b"k", b"v");
        engine.flush().unwrap();
    }
    let orphan = fixture.table_dir().join("999999.sst");
    fs::write(&orphan, b"half-written table").unwrap();

    let engine = fixture.open(StorageConfig::default());
    assert!(!orphan.exists());
    assert_eq!(get(&engine, NODES, b"k"), Some(b"v".to_vec()));
}

#[test]
fn test_tables_readable_after_compression_change() {
    let fixture = EngineFixture::new();
    let value = vec![b'x'; 2048];
    let settings = [
        (b"snappy".as_slice(), Compression::Fast),
        (b"lz4".as_slice(), Compression::Balanced),
        (b"zstd".as_slice(), Compression::HighRatio),
    ];
    // Keep every table in level 0 so each is read with its own codec
    let config = |compression| {
        let mut config = StorageConfig::default();
        config.table.compression = compression;
        config.compaction.level0_trigger = 8;
        config
    };
    for (key, compression) in settings {
        let engine = fixture.open(config(compression));
        put(&engine, NODES, key, &value);
        engine.flush().unwrap();
    }

    let engine = fixture.open(config(Compression::None));
    put(&engine, NODES, b"raw", &value);
    engine.flush().unwrap();
    assert_eq!(files_with_extension(&fixture.table_dir(), ".sst").len(), 4);
    for (key, _) in settings {
        assert_eq!(get(&engine, NODES, key), Some(value.clone()));
    }
    assert_eq!(get(&engine, NODES, b"raw"), Some(value));
}

#[test]
fn test_write_over_memtable_limit_flushes_before_returning() {
    let fixture = EngineFixture::new();
    let mut config = tiny_config();
    config.compaction.level0_trigger = 8;
    let engine = fixture.open(config);

    put(&engine, NODES, b"small", b"v");
    assert_eq!(engine.stats().unwrap().level_files[0], 0);

    put(&engine, NODES, b"large", &[b'x'; 2048]);
    assert_eq!(engine.stats().unwrap().level_files[0], 1);
    assert_eq!(files_with_extension(&fixture.table_dir(), ".sst").len(), 1);
}

#[test]
fn test_batch_commits_under_one_sequence() {
    let fixture = EngineFixture::new();
    let engine = fixture.open(StorageConfig::default());

    let seq = engine
        .write(
            vec![
                WriteOp::Put {
                    namespace: NODES,
                    key: b"n1".to_vec(),
                    value: b"a".to_vec(),
                },
                WriteOp::Put {
                    namespace: LINKS,
                    key: b"l1".to_vec(),
                    value: b"b".to_vec(),
                },
                WriteOp::Delete {
                    namespace: NODES,
                    key: b"n1".to_vec(),
                },
            ],
            WriteOptions::synced(),
        )
        .unwrap();

    assert_eq!(seq, 1);
    // Later ops in a batch win over earlier ones on the same key
    assert_eq!(get(&engine, NODES, b"n1"), None);
    assert_eq!(get(&engine, LINKS, b"l1"), Some(b"b".to_vec()));
}

#[test]
fn test_concurrent_writers_and_readers() {
    let fixture = EngineFixture::new();
    let engine = Arc::new(fixture.open(tiny_config()));

    let writers: Vec<_> = (0..4u8)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100u32 {
                    let key = format!("t{}:{:04}", t, i);
                    put(&engine, NODES, key.as_bytes(), &[t]);
                }
            })
        })
        .collect();
    let reader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..200 {
                let _ = get(&engine, NODES, b"t0:0000");
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(engine.latest_sequence(), 400);
    for t in 0..4u8 {
        let key = format!("t{}:0099", t);
        assert_eq!(get(&engine, NODES, key.as_bytes()), Some(vec![t]));
    }
}
