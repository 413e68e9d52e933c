//! Task scheduler.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::lock::LockTable;
use crate::plan::PlanResult;
use crate::schema::Catalog;
use crate::scope::TableScope;
use crate::stats::DatabaseStats;
use crate::task::{ExecEnv, RowIdAllocator, Task, TaskState};
use crate::types::{TableId, TaskId, Version};
use lockstep_storage::PersistenceAdapter;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What the runner reports for a committed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// The task that ran.
    pub task: TaskId,
    /// One result per plan.
    pub results: Vec<PlanResult>,
    /// Versions of the read scope at admission. Stable for the whole run
    /// since no writer can touch those tables while the task holds them.
    pub read_versions: BTreeMap<TableId, Version>,
    /// New versions of the tables this task changed. Empty for read-only
    /// tasks and for tasks whose net diff was empty.
    pub written: BTreeMap<TableId, Version>,
}

#[derive(Debug)]
struct PendingEntry {
    task: TaskId,
    scope: TableScope,
}

/// Everything the admission rule looks at. Guarded by one mutex.
#[derive(Debug, Default)]
struct SchedulerState {
    locks: LockTable,
    versions: HashMap<TableId, Version>,
    pending: VecDeque<PendingEntry>,
    /// Admitted tasks whose caller has not woken up yet.
    admitted: HashMap<TaskId, BTreeMap<TableId, Version>>,
    running: HashMap<TaskId, TableScope>,
    closed: bool,
}

impl SchedulerState {
    fn version(&self, table: TableId) -> Version {
        self.versions.get(&table).copied().unwrap_or_default()
    }

    fn is_pending(&self, task: TaskId) -> bool {
        self.pending.iter().any(|e| e.task == task)
    }

    fn withdraw(&mut self, task: TaskId) -> bool {
        match self.pending.iter().position(|e| e.task == task) {
            Some(pos) => self.pending.remove(pos).is_some(),
            None => false,
        }
    }

    /// Scans the whole pending queue in arrival order and admits every task
    /// whose scope is grantable right now.
    ///
    /// A task that conflicts is skipped but stays in place, so it is
    /// retried ahead of later arrivals on every release. Later tasks that
    /// overlap a skipped task are held back as well, otherwise a stream of
    /// readers could keep a waiting writer out forever. Tasks on disjoint
    /// tables still pass.
    fn admit_ready(&mut self) -> CoreResult<usize> {
        let mut admitted = 0;
        let mut held_reads = BTreeSet::new();
        let mut held_writes = BTreeSet::new();
        let mut i = 0;
        while i < self.pending.len() {
            let Some(entry) = self.pending.get(i) else {
                break;
            };
            let grantable = !entry.scope.reads_any(&held_writes)
                && !entry.scope.writes_any(&held_reads)
                && self.locks.can_grant(entry.task, &entry.scope);
            if !grantable {
                held_reads.extend(entry.scope.read_set().iter().copied());
                held_writes.extend(entry.scope.write_set().iter().copied());
                i += 1;
                continue;
            }
            let Some(entry) = self.pending.remove(i) else {
                break;
            };
            self.locks.acquire(entry.task, &entry.scope)?;
            let read_versions = entry
                .scope
                .read_set()
                .iter()
                .map(|t| (*t, self.version(*t)))
                .collect();
            debug!(task = %entry.task, "task admitted");
            self.admitted.insert(entry.task, read_versions);
            self.running.insert(entry.task, entry.scope);
            admitted += 1;
        }
        Ok(admitted)
    }

    /// Bumps versions of `written`, releases the task's locks and re-scans
    /// the pending queue.
    fn release(
        &mut self,
        task: TaskId,
        written: &BTreeSet<TableId>,
    ) -> CoreResult<BTreeMap<TableId, Version>> {
        let scope = self
            .running
            .remove(&task)
            .ok_or_else(|| CoreError::internal(format!("{task} released but not running")))?;
        let mut bumped = BTreeMap::new();
        for table in written {
            if !scope.can_write(*table) {
                return Err(CoreError::internal(format!(
                    "{task} committed to {table} outside its write set"
                )));
            }
            let next = self.version(*table).next();
            self.versions.insert(*table, next);
            bumped.insert(*table, next);
        }
        self.locks.release(task, &scope)?;
        self.admit_ready()?;
        Ok(bumped)
    }
}

/// Releases a running task's locks if it unwinds before finishing.
struct Admission<'r> {
    runner: &'r Runner,
    task: TaskId,
    finished: bool,
}

impl Admission<'_> {
    fn finish(mut self, written: &BTreeSet<TableId>) -> CoreResult<BTreeMap<TableId, Version>> {
        self.finished = true;
        self.runner.finish(self.task, written)
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.runner.finish(self.task, &BTreeSet::new()) {
                error!(task = %self.task, error = %err, "failed to release locks of unwound task");
            }
        }
    }
}

/// Admits tasks against the lock table and runs them.
///
/// ## Execution model
///
/// The thread that submits a task also runs it. A task waiting for
/// admission parks on a condition variable; every enqueue and every
/// release re-scans the pending queue inside the scheduler mutex and wakes
/// the callers whose tasks were admitted.
///
/// Version bumps, lock release and the follow-up admission scan happen in
/// one critical section, so the version sequence of a table is exactly the
/// order in which its writers released it.
pub struct Runner {
    state: Mutex<SchedulerState>,
    admitted: Condvar,
    catalog: Arc<Catalog>,
    adapter: Arc<dyn PersistenceAdapter>,
    row_ids: RowIdAllocator,
    config: Config,
    stats: Arc<DatabaseStats>,
}

impl Runner {
    /// Creates a runner over a catalog and a persistence adapter.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the adapter cannot report its highest row
    /// id.
    pub fn new(
        catalog: Arc<Catalog>,
        adapter: Arc<dyn PersistenceAdapter>,
        config: Config,
        stats: Arc<DatabaseStats>,
    ) -> CoreResult<Self> {
        let row_ids = RowIdAllocator::starting_after(adapter.max_row_id()?);
        Ok(Self {
            state: Mutex::new(SchedulerState::default()),
            admitted: Condvar::new(),
            catalog,
            adapter,
            row_ids,
            config,
            stats,
        })
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Runs a task to completion on the calling thread.
    ///
    /// Blocks until the task's whole scope is granted, or until `timeout`
    /// expires, in which case the task is withdrawn with no side effects.
    ///
    /// # Errors
    ///
    /// - `DatabaseClosed` if the runner shut down before admission
    /// - `QueueFull` if the task would have to wait and the pending queue
    ///   is at its limit
    /// - `Timeout` or `Withdrawn` if the task never ran
    /// - any plan or adapter error, after the task was rolled back
    pub fn execute(&self, mut task: Task, timeout: Option<Duration>) -> CoreResult<TaskOutcome> {
        let id = task.id();
        let read_versions = self.admit(id, task.scope(), timeout)?;

        let admission = Admission {
            runner: self,
            task: id,
            finished: false,
        };
        task.transition(TaskState::Running)?;

        let env = ExecEnv {
            catalog: &self.catalog,
            adapter: self.adapter.as_ref(),
            row_ids: &self.row_ids,
            enforce_foreign_keys: self.config.enforce_foreign_keys,
        };
        let mut journal = Journal::new(id);
        let committed = task.run(&env, &mut journal).and_then(|results| {
            let diff = journal.flush(&self.catalog, self.adapter.as_ref())?;
            Ok((results, diff))
        });

        match committed {
            Ok((results, diff)) => {
                let written = admission.finish(&diff.tables)?;
                task.transition(TaskState::Committed)?;
                self.stats
                    .record_commit(diff.rows as u64, diff.batch.indexes().len() as u64);
                if written.is_empty() {
                    debug!(task = %id, "task committed with no writes");
                } else {
                    info!(task = %id, rows = diff.rows, versions = ?written, "task committed");
                }
                Ok(TaskOutcome {
                    task: id,
                    results,
                    read_versions,
                    written,
                })
            }
            Err(err) => {
                admission.finish(&BTreeSet::new())?;
                task.transition(TaskState::RolledBack)?;
                self.stats.record_rollback();
                if matches!(err, CoreError::AdapterWriteFailure { .. }) {
                    self.stats.record_adapter_failure();
                }
                if err.is_fatal() {
                    error!(task = %id, error = %err, "task aborted");
                } else {
                    warn!(task = %id, error = %err, "task rolled back");
                }
                Err(err)
            }
        }
    }

    /// Enqueues a task and parks until it is admitted.
    fn admit(
        &self,
        task: TaskId,
        scope: &TableScope,
        timeout: Option<Duration>,
    ) -> CoreResult<BTreeMap<TableId, Version>> {
        let deadline = timeout.map(|t| (t, Instant::now() + t));
        let mut state = self.state.lock();
        if state.closed {
            return Err(CoreError::DatabaseClosed);
        }

        state.pending.push_back(PendingEntry {
            task,
            scope: scope.clone(),
        });
        if state.admit_ready()? > 0 {
            self.admitted.notify_all();
        }
        // Only a task that has to wait counts against the limit.
        let limit = self.config.max_pending_tasks;
        if limit > 0 && state.is_pending(task) && state.pending.len() > limit {
            state.withdraw(task);
            return Err(CoreError::QueueFull { limit });
        }
        self.stats.record_submit();
        debug!(
            task = %task,
            reads = ?scope.read_set(),
            writes = ?scope.write_set(),
            admitted = !state.is_pending(task),
            "task submitted"
        );

        loop {
            if let Some(versions) = state.admitted.remove(&task) {
                return Ok(versions);
            }
            if !state.is_pending(task) {
                return Err(if state.closed {
                    CoreError::DatabaseClosed
                } else {
                    CoreError::Withdrawn { task }
                });
            }
            match deadline {
                None => self.admitted.wait(&mut state),
                Some((timeout, deadline)) => {
                    if self.admitted.wait_until(&mut state, deadline).timed_out() {
                        if let Some(versions) = state.admitted.remove(&task) {
                            return Ok(versions);
                        }
                        if state.withdraw(task) {
                            self.stats.record_withdraw();
                            info!(task = %task, ?timeout, "task timed out waiting for admission");
                            return Err(CoreError::Timeout { task, timeout });
                        }
                    }
                }
            }
        }
    }

    fn finish(
        &self,
        task: TaskId,
        written: &BTreeSet<TableId>,
    ) -> CoreResult<BTreeMap<TableId, Version>> {
        let mut state = self.state.lock();
        let bumped = state.release(task, written);
        self.admitted.notify_all();
        bumped
    }

    /// Removes a pending task from the queue.
    ///
    /// Returns false if the task is not pending (already admitted, finished
    /// or unknown). A running task cannot be withdrawn.
    pub fn withdraw(&self, task: TaskId) -> bool {
        let mut state = self.state.lock();
        let removed = state.withdraw(task);
        if removed {
            self.stats.record_withdraw();
            info!(task = %task, "task withdrawn");
            self.admitted.notify_all();
        }
        removed
    }

    /// Returns the current version of a table.
    #[must_use]
    pub fn version(&self, table: TableId) -> Version {
        self.state.lock().version(table)
    }

    /// Returns the current versions of several tables at once.
    #[must_use]
    pub fn versions<'t>(&self, tables: impl IntoIterator<Item = &'t TableId>) -> BTreeMap<TableId, Version> {
        let state = self.state.lock();
        tables.into_iter().map(|t| (*t, state.version(*t))).collect()
    }

    /// Returns the ids of pending tasks in arrival order.
    #[must_use]
    pub fn pending(&self) -> Vec<TaskId> {
        self.state.lock().pending.iter().map(|e| e.task).collect()
    }

    /// Returns the ids of admitted tasks that have not finished.
    #[must_use]
    pub fn running(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self.state.lock().running.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Stops admitting tasks.
    ///
    /// Pending tasks are dropped and their callers fail with
    /// `DatabaseClosed`. Running tasks finish normally.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        for _ in 0..dropped {
            self.stats.record_withdraw();
        }
        info!(dropped, running = state.running.len(), "runner shut down");
        self.admitted.notify_all();
    }

    /// Returns true once [`Runner::shutdown`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
