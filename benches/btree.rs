use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

use ibexdb::{ColumnDef, Database, TableSchema};

fn schema() -> TableSchema {
    TableSchema::new(
        "bench",
        vec![
            ColumnDef::new("id", "INT").primary_key(),
            ColumnDef::new("payload", "BLOB"),
        ],
    )
}

fn populated_db(rows: usize) -> (Database, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("bench")).unwrap();
    db.create_table("bench", schema()).unwrap();
    for i in 0..rows {
        let key = format!("key{i:08}");
        db.insert("bench", key.into_bytes(), vec![0xA5u8; 64]).unwrap();
    }
    (db, dir)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_1k_sequential", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Database::open(dir.path().join("bench")).unwrap();
                db.create_table("bench", schema()).unwrap();
                (db, dir)
            },
            |(db, _dir)| {
                for i in 0..1000 {
                    let key = format!("key{i:08}");
                    db.insert("bench", key.into_bytes(), vec![0xA5u8; 64]).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
}

fn bench_point_read(c: &mut Criterion) {
    let (db, _dir) = populated_db(10_000);
    c.bench_function("point_read_10k", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = format!("key{:08}", i % 10_000);
            i = i.wrapping_add(7919);
            black_box(db.get("bench", key.into_bytes()).unwrap());
        });
    });
}

fn bench_scan(c: &mut Criterion) {
    let (db, _dir) = populated_db(10_000);
    c.bench_function("full_scan_10k", |b| {
        b.iter(|| black_box(db.scan("bench").unwrap().len()));
    });
}

criterion_group!(benches, bench_insert, bench_point_read, bench_scan);
criterion_main!(benches);
