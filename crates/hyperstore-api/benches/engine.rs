//! Engine benchmarks: point writes under each durability mode, batched
//! commits, point reads from memtable and tables, and full scans.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hyperstore::{Database, DatabaseOptions, NamespaceId, SyncMode, WriteBatch};
use std::hint::black_box;
use tempfile::TempDir;

const NODES: NamespaceId = NamespaceId::NODES;

fn key(i: u64) -> Vec<u8> {
    format!("node:{:010}", i).into_bytes()
}

fn open(options: DatabaseOptions) -> (TempDir, Database) {
    let dir = TempDir::new().expect("tempdir");
    let db = Database::open_with_options(dir.path().join("db"), options).expect("open");
    (dir, db)
}

fn populated(count: u64, flushed: bool) -> (TempDir, Database) {
    let (dir, db) = open(DatabaseOptions::default().with_durability(SyncMode::None));
    let mut batch = WriteBatch::new();
    for i in 0..count {
        batch.put_in(NODES, &key(i), &[0x5A; 100]);
        if batch.count() == 1000 {
            db.write(&batch).expect("write");
            batch.clear();
        }
    }
    db.write(&batch).expect("write");
    if flushed {
        db.flush().expect("flush");
    }
    (dir, db)
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    for mode in [SyncMode::None, SyncMode::Async, SyncMode::Sync] {
        let (_dir, db) = open(DatabaseOptions::default().with_durability(mode));
        let mut i = 0u64;
        group.bench_function(BenchmarkId::new("durability", format!("{:?}", mode)), |b| {
            b.iter(|| {
                i += 1;
                db.put(NODES, &key(i), black_box(&[0x5Au8; 100])).expect("put");
            });
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    for size in [10u64, 100, 1000] {
        let (_dir, db) = open(DatabaseOptions::default().with_durability(SyncMode::Async));
        let mut next = 0u64;
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("ops", size), &size, |b, &size| {
            b.iter(|| {
                let mut batch = WriteBatch::new();
                for _ in 0..size {
                    next += 1;
                    batch.put_in(NODES, &key(next), &[0x5A; 100]);
                }
                db.write(&batch).expect("write");
            });
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    for flushed in [false, true] {
        let (_dir, db) = populated(10_000, flushed);
        let source = if flushed { "sstable" } else { "memtable" };
        let mut i = 0u64;
        group.bench_function(BenchmarkId::new("hit", source), |b| {
            b.iter(|| {
                i = (i + 7919) % 10_000;
                black_box(db.get(NODES, &key(i)).expect("get"));
            });
        });
        group.bench_function(BenchmarkId::new("miss", source), |b| {
            b.iter(|| black_box(db.get(NODES, b"absent").expect("get")));
        });
    }
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let (_dir, db) = populated(10_000, true);
    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("forward", |b| {
        b.iter(|| {
            let mut iter = db.iter(NODES).expect("iter");
            iter.seek_to_first().expect("seek");
            let mut count = 0u64;
            while iter.valid() {
                count += 1;
                iter.next().expect("next");
            }
            black_box(count)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_put, bench_batch, bench_get, bench_scan);
criterion_main!(benches);
