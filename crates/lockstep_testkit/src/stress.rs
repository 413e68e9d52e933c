//! Stress tests for Lockstep.
//!
//! These drive the scheduler under heavy load and concurrent access.

use crate::fixtures::{insert_job, insert_user, scan, JOB, USER};
use lockstep_core::{Database, InsertPlan, PlanRef, TaskType, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of tasks to submit.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Rows inserted per task in batch tests.
    pub batch_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            batch_size: 100,
        }
    }
}

fn tally(result: lockstep_core::CoreResult<impl Sized>, ok: &mut usize, failed: &mut usize) {
    match result {
        Ok(_) => *ok += 1,
        Err(_) => *failed += 1,
    }
}

/// Run a sequential write stress test, one job per task.
pub fn stress_sequential_writes(db: &Database, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        tally(
            db.exec(insert_job(i as i64, "new")),
            &mut successful,
            &mut failed,
        );
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run concurrent writers against the `job` table.
///
/// Every thread inserts its own key range, so every task should commit
/// and the table version should end equal to the number of commits.
pub fn stress_concurrent_writers(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let id = (t * ops_per_thread + i) as i64;
                    match db.exec(insert_job(id, "new")) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run readers of `job` alongside writers of `job` and `user`.
///
/// Even threads write; odd threads scan. Scans must never observe a job
/// count that goes backwards.
pub fn stress_mixed_contention(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                let mut seen = 0usize;
                for i in 0..ops_per_thread {
                    let id = (t * ops_per_thread + i) as i64;
                    let ok = if t % 2 == 0 {
                        let plans = vec![insert_job(id, "new"), insert_user(id, None)];
                        db.create_transaction(TaskType::ReadWrite).exec(plans).is_ok()
                    } else {
                        match db.exec(scan(JOB)) {
                            Ok(result) => {
                                let count = result.results[0].rows().map_or(0, <[_]>::len);
                                let monotonic = count >= seen;
                                seen = count;
                                monotonic
                            }
                            Err(_) => false,
                        }
                    };
                    if ok {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a task rollback stress test.
///
/// Every other task re-inserts its first job and rolls back.
pub fn stress_task_rollbacks(db: &Database, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let id = i as i64;
        let mut plans = vec![insert_job(id, "new")];
        if i % 2 == 0 {
            plans.push(insert_job(id, "dup"));
        }
        tally(
            db.create_transaction(TaskType::ReadWrite).exec(plans),
            &mut successful,
            &mut failed,
        );
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a large task stress test, `batch_size` users per task.
pub fn stress_large_tasks(db: &Database, config: &StressConfig) -> StressTestResult {
    let batch_size = config.batch_size.max(1);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let rows = (0..batch_size)
            .map(|i| vec![Value::Integer((batch * batch_size + i) as i64), Value::Null])
            .collect();
        let plan: PlanRef = Arc::new(InsertPlan::new(USER, rows));
        match db.exec(plan) {
            Ok(_) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;
    use lockstep_core::Version;

    #[test]
    fn test_sequential_writes() {
        let test_db = TestDatabase::memory();
        let config = StressConfig {
            operations: 500,
            ..Default::default()
        };

        let result = stress_sequential_writes(&test_db, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
        assert_eq!(test_db.version(JOB), Version::new(500));
    }

    #[test]
    fn test_concurrent_writers() {
        let test_db = TestDatabase::memory();
        let adapter = test_db.adapter.clone();
        let db = Arc::new(test_db.db);
        let config = StressConfig {
            operations: 400,
            threads: 4,
            ..Default::default()
        };

        let result = stress_concurrent_writers(Arc::clone(&db), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(db.version(JOB), Version::new(400));
        assert_eq!(adapter.snapshot().row_count(JOB.as_u32()), 400);
    }

    #[test]
    fn test_mixed_contention() {
        let test_db = TestDatabase::memory();
        let db = Arc::new(test_db.db);
        let config = StressConfig {
            operations: 400,
            threads: 4,
            ..Default::default()
        };

        let result = stress_mixed_contention(Arc::clone(&db), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(db.version(JOB), db.version(USER));
        assert!(db.pending_tasks().is_empty());
        assert!(db.running_tasks().is_empty());
    }

    #[test]
    fn test_task_rollbacks() {
        let test_db = TestDatabase::memory();
        let config = StressConfig {
            operations: 100,
            ..Default::default()
        };

        let result = stress_task_rollbacks(&test_db, &config);
        assert_eq!(result.successful_ops, 50);
        assert_eq!(result.failed_ops, 50);
        assert_eq!(test_db.version(JOB), Version::new(50));
        assert_eq!(test_db.adapter.snapshot().row_count(JOB.as_u32()), 50);
        assert_eq!(test_db.stats().tasks_rolled_back(), 50);
    }

    #[test]
    fn test_large_tasks() {
        let test_db = TestDatabase::memory();
        let config = StressConfig {
            operations: 1_000,
            batch_size: 100,
            ..Default::default()
        };

        let result = stress_large_tasks(&test_db, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(test_db.version(USER), Version::new(10));
        assert_eq!(test_db.adapter.write_count(), 10);
    }
}
