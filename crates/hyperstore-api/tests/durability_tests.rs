// Integration tests for open, close, locking and recovery

mod common;

use common::{small_options, DbFixture};
use hyperstore::{Compression, Database, DatabaseOptions, Error, NamespaceId, SyncMode};
use std::fs;

const NODES: NamespaceId = NamespaceId::NODES;

#[test]
fn test_open_creates_well_known_namespaces() {
    let fixture = DbFixture::new();
    let db = fixture.open();

    assert_eq!(
        db.namespaces().unwrap(),
        vec![
            "default",
            "nodes",
            "links",
            "incoming",
            "outgoing",
            "attention",
            "truth_values",
            "metadata"
        ]
    );
    assert_eq!(db.namespace_id("truth_values"), Some(NamespaceId::TRUTH_VALUES));
    assert_eq!(db.namespace_id("unknown"), None);
}

#[test]
fn test_open_missing_without_create_fails() {
    let fixture = DbFixture::new();
    let result = Database::open(&fixture.path, false, Compression::None);
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(!fixture.path.exists());
}

#[test]
fn test_open_file_path_fails() {
    let fixture = DbFixture::new();
    fs::write(&fixture.path, b"not a database").unwrap();
    assert!(matches!(
        Database::open(&fixture.path, true, Compression::None),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_second_handle_is_locked_out() {
    let fixture = DbFixture::new();
    let db = fixture.open();

    let second = Database::open(&fixture.path, true, Compression::None);
    assert!(matches!(second, Err(Error::Locked(_))));

    db.close().unwrap();
    let reopened = Database::open(&fixture.path, false, Compression::None).unwrap();
    assert!(reopened.is_open());
}

#[test]
fn test_close_is_idempotent_and_rejects_operations() {
    let fixture = DbFixture::new();
    let db = fixture.open();
    db.put(NODES, b"k", b"v").unwrap();

    db.close().unwrap();
    db.close().unwrap();
    assert!(!db.is_open());

    assert!(matches!(db.put(NODES, b"k", b"v"), Err(Error::NotOpen)));
    assert!(matches!(db.get(NODES, b"k"), Err(Error::NotOpen)));
    assert!(matches!(db.delete(NODES, b"k"), Err(Error::NotOpen)));
    assert!(matches!(db.flush(), Err(Error::NotOpen)));
    assert!(matches!(db.snapshot(), Err(Error::NotOpen)));
    assert!(matches!(db.iter(NODES), Err(Error::NotOpen)));
    assert!(matches!(db.property("hyperstore.stats"), Err(Error::NotOpen)));
    assert!(matches!(db.namespaces(), Err(Error::NotOpen)));
    assert!(db.put(NODES, b"k", b"v").unwrap_err().is_not_open());
}

#[test]
fn test_unflushed_writes_survive_reopen() {
    let fixture = DbFixture::new();
    {
        let db = fixture.open();
        db.put(NODES, b"a", b"1").unwrap();
        db.put(NamespaceId::LINKS, b"b", b"2").unwrap();
        db.delete(NODES, b"a").unwrap();
        db.put(NODES, b"c", b"3").unwrap();
        // Dropping the last handle closes it
    }

    let db = fixture.open();
    assert_eq!(db.get(NODES, b"a").unwrap(), None);
    assert_eq!(db.get(NamespaceId::LINKS, b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get(NODES, b"c").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_many_flushes_survive_reopen() {
    let fixture = DbFixture::new();
    {
        let db = fixture.open_with(small_options());
        for i in 0..300 {
            db.put(NODES, &common::key("n", i), format!("v{}", i).as_bytes())
                .unwrap();
        }
        db.close().unwrap();
    }

    let db = fixture.open_with(small_options());
    for i in (0..300).step_by(13) {
        assert_eq!(
            db.get(NODES, &common::key("n", i)).unwrap(),
            Some(format!("v{}", i).into_bytes())
        );
    }
}

#[test]
fn test_torn_wal_tail_is_tolerated() {
    let fixture = DbFixture::new();
    {
        let db = fixture.open();
        db.put(NODES, b"durable", b"yes").unwrap();
    }

    // Append garbage to the newest WAL segment
    let wal_dir = fixture.path.join("wal");
    let mut segments: Vec<_> = fs::read_dir(&wal_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    segments.sort();
    let newest = segments.last().unwrap();
    let mut bytes = fs::read(newest).unwrap();
    bytes.extend_from_slice(&[0xAB; 7]);
    fs::write(newest, bytes).unwrap();

    let db = fixture.open();
    assert_eq!(db.get(NODES, b"durable").unwrap(), Some(b"yes".to_vec()));
}

#[test]
fn test_durability_modes() {
    for mode in [SyncMode::Sync, SyncMode::Async, SyncMode::None] {
        let fixture = DbFixture::new();
        {
            let db = fixture.open_with(DatabaseOptions::default().with_durability(mode));
            db.put(NODES, b"k", b"v").unwrap();
            db.close().unwrap();
        }
        let db = fixture.open();
        assert_eq!(db.get(NODES, b"k").unwrap(), Some(b"v".to_vec()), "mode {:?}", mode);
    }
}

#[test]
fn test_extra_namespaces_are_appended_on_reopen() {
    let fixture = DbFixture::new();
    {
        let db = fixture.open();
        db.put(NODES, b"k", b"v").unwrap();
    }

    let db = fixture.open_with(DatabaseOptions::default().with_namespace("embeddings"));
    let embeddings = db.namespace_id("embeddings").unwrap();
    assert_eq!(embeddings, NamespaceId(8));
    assert_eq!(db.namespace_id("nodes"), Some(NODES));

    db.put(embeddings, b"node:1", b"[0.1, 0.2]").unwrap();
    assert_eq!(db.get(NODES, b"node:1").unwrap(), None);
    assert_eq!(db.get(NODES, b"k").unwrap(), Some(b"v".to_vec()));
}
