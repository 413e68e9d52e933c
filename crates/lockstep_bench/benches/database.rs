//! Task execution benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lockstep_core::{Filter, GetPlan, InsertPlan, PlanRef, ScanPlan, TaskType, Value};
use lockstep_testkit::{
    delete_job, insert_job, insert_user, scan, set_job_status, TestDatabase, JOB, JOB_STATUS,
    STATUSES, USER,
};
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

fn random_status() -> &'static str {
    let mut rng = rand::thread_rng();
    STATUSES[rng.gen_range(0..STATUSES.len())]
}

/// Benchmark single-row implicit tasks.
fn bench_single_insert(c: &mut Criterion) {
    c.bench_function("single_insert", |b| {
        let test_db = TestDatabase::memory();
        let mut next = 0i64;

        b.iter(|| {
            next += 1;
            test_db.exec(black_box(insert_job(next, "new"))).unwrap();
        });
    });
}

/// Benchmark multi-row inserts flushed as one batch.
fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let test_db = TestDatabase::memory();
                let mut next = 0i64;

                b.iter(|| {
                    let rows = (0..batch_size)
                        .map(|_| {
                            next += 1;
                            vec![Value::Integer(next), Value::from(random_status())]
                        })
                        .collect();
                    let plan: PlanRef = Arc::new(InsertPlan::new(JOB, rows));
                    test_db.exec(black_box(plan)).unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark point reads from a populated table.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for row_count in [100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(row_count),
            row_count,
            |b, &count| {
                let test_db = TestDatabase::memory();
                let rows = (0..count)
                    .map(|i| vec![Value::Integer(i), Value::from(random_status())])
                    .collect();
                let created = test_db
                    .exec(Arc::new(InsertPlan::new(JOB, rows)))
                    .unwrap();
                let ids: Vec<_> = created.results[0]
                    .rows()
                    .unwrap()
                    .iter()
                    .map(|r| r.id())
                    .collect();

                let mut rng = rand::thread_rng();

                b.iter(|| {
                    let id = ids[rng.gen_range(0..ids.len())];
                    let result = test_db.exec(Arc::new(GetPlan::new(JOB, id))).unwrap();
                    black_box(result);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark indexed and unindexed filtered scans.
fn bench_filtered_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_scan");

    for row_count in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*row_count as u64));
        let test_db = TestDatabase::memory();
        let rows = (0..*row_count)
            .map(|i| vec![Value::Integer(i), Value::from(random_status())])
            .collect();
        test_db
            .exec(Arc::new(InsertPlan::new(JOB, rows)))
            .unwrap();

        group.bench_with_input(BenchmarkId::new("by_status", row_count), row_count, |b, _| {
            let plan: PlanRef = Arc::new(ScanPlan::new(JOB, Filter::eq(JOB_STATUS, "done")));
            b.iter(|| black_box(test_db.exec(Arc::clone(&plan)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("all", row_count), row_count, |b, _| {
            b.iter(|| black_box(test_db.exec(scan(JOB)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark a task whose writes cancel out, so nothing is flushed.
fn bench_empty_commit(c: &mut Criterion) {
    c.bench_function("empty_commit", |b| {
        let test_db = TestDatabase::memory();

        b.iter(|| {
            test_db
                .create_transaction(TaskType::ReadWrite)
                .exec(vec![insert_job(1, "new"), delete_job(1)])
                .unwrap();
        });
    });
}

/// Benchmark update with index relocation.
fn bench_update(c: &mut Criterion) {
    c.bench_function("update_status", |b| {
        let test_db = TestDatabase::memory();
        test_db.exec(insert_job(1, "new")).unwrap();

        b.iter(|| {
            test_db
                .exec(black_box(set_job_status(1, random_status())))
                .unwrap();
        });
    });
}

/// Benchmark contended writers on one table against writers of disjoint tables.
fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let per_thread = 50;

    for threads in [2usize, 4].iter() {
        group.throughput(Throughput::Elements((threads * per_thread) as u64));
        group.bench_with_input(BenchmarkId::new("same_table", threads), threads, |b, &threads| {
            let db = Arc::new(TestDatabase::memory().db);
            let next = Arc::new(AtomicI64::new(0));
            b.iter(|| run_writers(&db, &next, threads, per_thread, |_| JOB));
        });
        group.bench_with_input(BenchmarkId::new("disjoint", threads), threads, |b, &threads| {
            let db = Arc::new(TestDatabase::memory().db);
            let next = Arc::new(AtomicI64::new(0));
            b.iter(|| {
                run_writers(&db, &next, threads, per_thread, |t| {
                    if t % 2 == 0 {
                        JOB
                    } else {
                        USER
                    }
                })
            });
        });
    }
    group.finish();
}

fn run_writers(
    db: &Arc<lockstep_core::Database>,
    next: &Arc<AtomicI64>,
    threads: usize,
    per_thread: usize,
    table_for: fn(usize) -> lockstep_core::TableId,
) {
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let db = Arc::clone(db);
            let next = Arc::clone(next);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    let id = next.fetch_add(1, Ordering::Relaxed);
                    let plan = if table_for(t) == JOB {
                        insert_job(id, "new")
                    } else {
                        insert_user(id, None)
                    };
                    db.exec(plan).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_batch_insert,
    bench_get,
    bench_filtered_scan,
    bench_empty_commit,
    bench_update,
    bench_contention,
);

criterion_main!(benches);
