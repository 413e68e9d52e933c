//! Persistence adapter benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lockstep_storage::{InMemoryAdapter, PersistenceAdapter, WriteBatch};

fn record(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

fn batch(rows: u64, start: u64, size: usize) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for id in start..start + rows {
        batch.put_row(1, id, record(size));
        batch.add_index_entry(1, "by_status", vec![(id % 5) as u8], id);
    }
    batch
}

/// Benchmark atomic writes by batch size.
fn bench_atomic_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic_write");

    for rows in [1u64, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*rows));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, &rows| {
            let adapter = InMemoryAdapter::new();
            let mut start = 0u64;

            b.iter(|| {
                let batch = batch(rows, start, 128);
                start += rows;
                adapter.atomic_write(black_box(&batch)).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark point reads from a populated adapter.
fn bench_get(c: &mut Criterion) {
    let adapter = InMemoryAdapter::new();
    adapter.atomic_write(&batch(10_000, 0, 128)).unwrap();
    let mut next = 0u64;

    c.bench_function("adapter_get", |b| {
        b.iter(|| {
            next = (next + 7919) % 10_000;
            black_box(adapter.get(1, black_box(next)).unwrap());
        });
    });
}

/// Benchmark full-table scans.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("adapter_scan");

    for rows in [100u64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*rows));
        let adapter = InMemoryAdapter::new();
        adapter.atomic_write(&batch(*rows, 0, 64)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| black_box(adapter.scan(1).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark index lookups.
fn bench_lookup_index(c: &mut Criterion) {
    let adapter = InMemoryAdapter::new();
    adapter.atomic_write(&batch(10_000, 0, 64)).unwrap();

    c.bench_function("adapter_lookup_index", |b| {
        b.iter(|| black_box(adapter.lookup_index(1, "by_status", black_box(&[3])).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_atomic_write,
    bench_get,
    bench_scan,
    bench_lookup_index,
);

criterion_main!(benches);
