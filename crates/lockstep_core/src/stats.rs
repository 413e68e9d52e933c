//! Database statistics.
//!
//! Counters for monitoring the scheduler.
//!
//! # Usage
//!
//! ```rust,ignore
//! let db = Database::open_in_memory(catalog)?;
//! db.exec(plan)?;
//!
//! let stats = db.stats();
//! println!("Committed: {}", stats.tasks_committed());
//! println!("Rows written: {}", stats.rows_written());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Database statistics.
///
/// All counters are atomic and can be read while tasks are running.
/// Values only ever increase.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    // Task counters
    tasks_submitted: AtomicU64,
    tasks_committed: AtomicU64,
    tasks_rolled_back: AtomicU64,
    tasks_withdrawn: AtomicU64,

    // Write counters
    rows_written: AtomicU64,
    index_entries_written: AtomicU64,
    adapter_failures: AtomicU64,

    // Observer counters
    observer_reruns: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_submit(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, rows: u64, index_entries: u64) {
        self.tasks_committed.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
        self.index_entries_written
            .fetch_add(index_entries, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.tasks_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_withdraw(&self) {
        self.tasks_withdrawn.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_adapter_failure(&self) {
        self.adapter_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_observer_rerun(&self) {
        self.observer_reruns.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of tasks handed to the scheduler.
    pub fn tasks_submitted(&self) -> u64 {
        self.tasks_submitted.load(Ordering::Relaxed)
    }

    /// Returns the number of committed tasks.
    pub fn tasks_committed(&self) -> u64 {
        self.tasks_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled back tasks.
    pub fn tasks_rolled_back(&self) -> u64 {
        self.tasks_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of tasks withdrawn before admission.
    ///
    /// Includes timeouts and tasks dropped at shutdown.
    pub fn tasks_withdrawn(&self) -> u64 {
        self.tasks_withdrawn.load(Ordering::Relaxed)
    }

    /// Returns the number of row records written to the adapter.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Returns the number of index deltas written to the adapter.
    pub fn index_entries_written(&self) -> u64 {
        self.index_entries_written.load(Ordering::Relaxed)
    }

    /// Returns the number of atomic writes the adapter rejected.
    pub fn adapter_failures(&self) -> u64 {
        self.adapter_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of observer re-runs executed.
    pub fn observer_reruns(&self) -> u64 {
        self.observer_reruns.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_submitted: self.tasks_submitted(),
            tasks_committed: self.tasks_committed(),
            tasks_rolled_back: self.tasks_rolled_back(),
            tasks_withdrawn: self.tasks_withdrawn(),
            rows_written: self.rows_written(),
            index_entries_written: self.index_entries_written(),
            adapter_failures: self.adapter_failures(),
            observer_reruns: self.observer_reruns(),
        }
    }
}

/// A point-in-time snapshot of database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Tasks handed to the scheduler.
    pub tasks_submitted: u64,
    /// Committed tasks.
    pub tasks_committed: u64,
    /// Rolled back tasks.
    pub tasks_rolled_back: u64,
    /// Tasks withdrawn before admission.
    pub tasks_withdrawn: u64,
    /// Row records written.
    pub rows_written: u64,
    /// Index deltas written.
    pub index_entries_written: u64,
    /// Rejected atomic writes.
    pub adapter_failures: u64,
    /// Observer re-runs executed.
    pub observer_reruns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = DatabaseStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_tasks() {
        let stats = DatabaseStats::new();

        stats.record_submit();
        stats.record_submit();
        stats.record_submit();
        stats.record_commit(3, 6);
        stats.record_rollback();
        stats.record_withdraw();

        let snap = stats.snapshot();
        assert_eq!(snap.tasks_submitted, 3);
        assert_eq!(snap.tasks_committed, 1);
        assert_eq!(snap.tasks_rolled_back, 1);
        assert_eq!(snap.tasks_withdrawn, 1);
        assert_eq!(snap.rows_written, 3);
        assert_eq!(snap.index_entries_written, 6);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(DatabaseStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_submit();
                    s.record_observer_rerun();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.tasks_submitted(), 1000);
        assert_eq!(stats.observer_reruns(), 1000);
    }
}
