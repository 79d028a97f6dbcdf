// Integration tests for atomic write batches

mod common;

use common::{key, DbFixture};
use hyperstore::{DatabaseOptions, Error, NamespaceId, WriteBatch};

#[test]
fn test_batch_commit_makes_all_visible() {
    let fixture = DbFixture::new();
    let db = fixture.open();

    let mut batch = WriteBatch::new();
    batch.put(b"default-key", b"d");
    batch.put_in(NamespaceId::NODES, b"node:1", b"n");
    batch.put_in(NamespaceId::LINKS, b"link:1", b"l");
    assert_eq!(batch.count(), 3);

    let sequence = db.write(&batch).unwrap();
    assert_eq!(sequence, 1);
    assert_eq!(db.get(NamespaceId::DEFAULT, b"default-key").unwrap(), Some(b"d".to_vec()));
    assert_eq!(db.get(NamespaceId::NODES, b"node:1").unwrap(), Some(b"n".to_vec()));
    assert_eq!(db.get(NamespaceId::LINKS, b"link:1").unwrap(), Some(b"l".to_vec()));

    // The batch is untouched by the commit
    assert_eq!(batch.count(), 3);
}

#[test]
fn test_batch_takes_one_sequence_number() {
    let fixture = DbFixture::new();
    let db = fixture.open();

    let mut batch = WriteBatch::new();
    for i in 0..50 {
        batch.put(&key("k", i), b"v");
    }
    assert_eq!(db.write(&batch).unwrap(), 1);
    db.put(NamespaceId::DEFAULT, b"after", b"x").unwrap();
    assert_eq!(
        db.property("hyperstore.latest-sequence-number").unwrap(),
        Some("2".to_string())
    );
}

#[test]
fn test_later_operation_in_batch_wins() {
    let fixture = DbFixture::new();
    let db = fixture.open();
    db.put(NamespaceId::DEFAULT, b"gone", b"old").unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"k", b"first");
    batch.put(b"k", b"second");
    batch.put(b"gone", b"resurrected");
    batch.delete(b"gone");
    db.write(&batch).unwrap();

    assert_eq!(db.get(NamespaceId::DEFAULT, b"k").unwrap(), Some(b"second".to_vec()));
    assert_eq!(db.get(NamespaceId::DEFAULT, b"gone").unwrap(), None);
}

#[test]
fn test_clear_and_reuse() {
    let fixture = DbFixture::new();
    let db = fixture.open();

    let mut batch = WriteBatch::new();
    batch.put(b"discarded", b"x");
    batch.clear();
    assert_eq!(batch.count(), 0);

    batch.put(b"kept", b"y");
    db.write(&batch).unwrap();
    assert_eq!(db.get(NamespaceId::DEFAULT, b"discarded").unwrap(), None);
    assert_eq!(db.get(NamespaceId::DEFAULT, b"kept").unwrap(), Some(b"y".to_vec()));
}

#[test]
fn test_empty_batch_is_noop() {
    let fixture = DbFixture::new();
    let db = fixture.open();

    assert_eq!(db.write(&WriteBatch::new()).unwrap(), 0);
    assert_eq!(db.stats().unwrap().latest_sequence, 0);
}

#[test]
fn test_unwritten_batch_drops_cleanly() {
    let fixture = DbFixture::new();
    let db = fixture.open();
    {
        let mut batch = WriteBatch::new();
        batch.put(b"never", b"written");
    }
    assert_eq!(db.get(NamespaceId::DEFAULT, b"never").unwrap(), None);
}

#[test]
fn test_failed_batch_applies_nothing() {
    let fixture = DbFixture::new();
    let db = fixture.open_with(DatabaseOptions::default().with_strict_namespaces(true));

    let mut batch = WriteBatch::new();
    batch.put_in(NamespaceId::NODES, b"valid", b"1");
    batch.put_in(NamespaceId(200), b"bad-namespace", b"2");

    assert!(matches!(db.write(&batch), Err(Error::InvalidState(_))));
    assert_eq!(db.get(NamespaceId::NODES, b"valid").unwrap(), None);
    assert_eq!(db.stats().unwrap().latest_sequence, 0);
}

#[test]
fn test_batch_after_close_fails() {
    let fixture = DbFixture::new();
    let db = fixture.open();
    db.close().unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"k", b"v");
    assert!(matches!(db.write(&batch), Err(Error::NotOpen)));
}

#[test]
fn test_batch_survives_reopen() {
    let fixture = DbFixture::new();
    {
        let db = fixture.open();
        let mut batch = WriteBatch::new();
        batch.put_in(NamespaceId::INCOMING, b"node:1", b"link:1");
        batch.put_in(NamespaceId::OUTGOING, b"link:1", b"node:1");
        db.write(&batch).unwrap();
    }

    let db = fixture.open();
    assert_eq!(db.get(NamespaceId::INCOMING, b"node:1").unwrap(), Some(b"link:1".to_vec()));
    assert_eq!(db.get(NamespaceId::OUTGOING, b"link:1").unwrap(), Some(b"node:1".to_vec()));
}
