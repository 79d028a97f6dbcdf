#![no_main]

use arbitrary::Arbitrary;
use hyperstore::{Database, DatabaseOptions, NamespaceId, SyncMode, WriteBatch};
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;

#[derive(Arbitrary, Debug)]
enum DbOp {
    Put { ns: u8, key: Vec<u8>, value: Vec<u8> },
    Get { ns: u8, key: Vec<u8> },
    Delete { ns: u8, key: Vec<u8> },
    Batch { ops: Vec<(u8, Vec<u8>, Option<Vec<u8>>)> },
    Flush,
    Compact { ns: u8 },
    Scan { ns: u8 },
}

/// Ids past the registry fall back to the default namespace
fn namespace(ns: u8) -> NamespaceId {
    let id = NamespaceId(ns as u32 % 12);
    if id.0 < 8 {
        id
    } else {
        NamespaceId::DEFAULT
    }
}

fuzz_target!(|ops: Vec<DbOp>| {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let options = DatabaseOptions::default()
        .with_durability(SyncMode::None)
        .with_memtable_size(4096);
    let Ok(db) = Database::open_with_options(dir.path(), options) else {
        return;
    };
    let mut model: BTreeMap<(u32, Vec<u8>), Vec<u8>> = BTreeMap::new();

    // Limit operations to prevent timeout
    for op in ops.into_iter().take(100) {
        match op {
            DbOp::Put { ns, key, value } => {
                if key.len() <= 1024 && value.len() <= 1024 {
                    db.put(NamespaceId(ns as u32 % 12), &key, &value).unwrap();
                    model.insert((namespace(ns).0, key), value);
                }
            }
            DbOp::Get { ns, key } => {
                let got = db.get(NamespaceId(ns as u32 % 12), &key).unwrap();
                assert_eq!(got.as_ref(), model.get(&(namespace(ns).0, key)));
            }
            DbOp::Delete { ns, key } => {
                db.delete(NamespaceId(ns as u32 % 12), &key).unwrap();
                model.remove(&(namespace(ns).0, key));
            }
            DbOp::Batch { ops } => {
                let mut batch = WriteBatch::new();
                for (ns, key, value) in ops.into_iter().take(20) {
                    let id = NamespaceId(ns as u32 % 12);
                    match value {
                        Some(value) => {
                            batch.put_in(id, &key, &value);
                            model.insert((namespace(ns).0, key), value);
                        }
                        None => {
                            batch.delete_in(id, &key);
                            model.remove(&(namespace(ns).0, key));
                        }
                    }
                }
                db.write(&batch).unwrap();
            }
            DbOp::Flush => db.flush().unwrap(),
            DbOp::Compact { ns } => db.compact_range(namespace(ns)).unwrap(),
            DbOp::Scan { ns } => {
                let id = namespace(ns);
                let mut iter = db.iter(id).unwrap();
                iter.seek_to_first().unwrap();
                let mut seen = Vec::new();
                while iter.valid() {
                    seen.push(iter.key().unwrap().to_vec());
                    iter.next().unwrap();
                }
                let expected: Vec<Vec<u8>> = model
                    .keys()
                    .filter(|(n, _)| *n == id.0)
                    .map(|(_, k)| k.clone())
                    .collect();
                assert_eq!(seen, expected);
            }
        }
    }
});
