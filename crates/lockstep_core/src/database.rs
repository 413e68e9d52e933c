//! Database facade.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::observer::{ObserverRegistry, QueryEvent};
use crate::plan::PlanRef;
use crate::schema::Catalog;
use crate::stats::DatabaseStats;
use crate::task::{ExecResult, Runner, Task, TaskOrigin, TaskType};
use crate::types::{SubscriptionId, TableId, TaskId, Version};
use crate::value::Value;
use lockstep_storage::{InMemoryAdapter, PersistenceAdapter};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The main database handle.
///
/// `Database` is the entry point for running work against a persisted
/// store. It provides:
/// - Explicit transactions over an ordered list of plans
/// - Implicit single-plan execution
/// - Continuous queries that re-run when the tables they read change
///
/// Every unit of work becomes a task. Tasks whose table scopes conflict
/// run one after another; tasks with disjoint scopes run at the same time
/// on their callers' threads.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use lockstep_core::{Catalog, Database, Config};
/// use std::sync::Arc;
///
/// let db = Database::open(catalog, Arc::new(my_adapter), Config::default())?;
///
/// // One plan, type inferred from its declared outputs
/// db.exec(insert_plan)?;
///
/// // Several plans committed atomically
/// db.create_transaction(TaskType::ReadWrite)
///     .exec(vec![debit, credit])?;
///
/// db.close()?;
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::open_in_memory()`:
///
/// ```rust,ignore
/// let db = Database::open_in_memory(catalog)?;
/// ```
pub struct Database {
    /// Configuration.
    config: Config,
    /// Table descriptors. Immutable once open.
    catalog: Arc<Catalog>,
    /// Scheduler and executor.
    runner: Runner,
    /// Live continuous queries.
    observers: ObserverRegistry,
    /// Counters.
    stats: Arc<DatabaseStats>,
    /// Next task ID.
    next_task: AtomicU64,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database over a persistence adapter.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the adapter cannot be queried for its
    /// highest row id.
    pub fn open(
        catalog: Catalog,
        adapter: Arc<dyn PersistenceAdapter>,
        config: Config,
    ) -> CoreResult<Self> {
        let catalog = Arc::new(catalog);
        let stats = Arc::new(DatabaseStats::new());
        let runner = Runner::new(
            Arc::clone(&catalog),
            adapter,
            config.clone(),
            Arc::clone(&stats),
        )?;
        info!(tables = catalog.len(), "database opened");
        Ok(Self {
            config,
            catalog,
            runner,
            observers: ObserverRegistry::new(),
            stats,
            next_task: AtomicU64::new(1),
            is_open: RwLock::new(true),
        })
    }

    /// Opens a database over a fresh in-memory adapter.
    ///
    /// # Errors
    ///
    /// Never fails in practice; returns `CoreResult` for symmetry with
    /// [`Database::open`].
    pub fn open_in_memory(catalog: Catalog) -> CoreResult<Self> {
        Self::open(catalog, Arc::new(InMemoryAdapter::new()), Config::default())
    }

    /// Starts describing an explicit transaction.
    ///
    /// Nothing is scheduled until [`Transaction::exec`] is called.
    #[must_use]
    pub fn create_transaction(&self, ty: TaskType) -> Transaction<'_> {
        Transaction {
            db: self,
            ty,
            params: Vec::new(),
            timeout: self.config.exec_timeout,
        }
    }

    /// Executes a single plan as an implicit task.
    ///
    /// The task is read-write iff the plan declares output tables.
    ///
    /// # Errors
    ///
    /// Returns the plan's error after rolling the task back, or a
    /// scheduling error if the task never ran.
    pub fn exec(&self, plan: PlanRef) -> CoreResult<ExecResult> {
        self.exec_with_params(plan, Vec::new())
    }

    /// Executes a single plan as an implicit task with bound parameters.
    ///
    /// # Errors
    ///
    /// See [`Database::exec`].
    pub fn exec_with_params(&self, plan: PlanRef, params: Vec<Value>) -> CoreResult<ExecResult> {
        let plans = vec![plan];
        let ty = TaskType::infer(&plans);
        self.submit(ty, TaskOrigin::Implicit, plans, params, self.config.exec_timeout)
    }

    /// Executes a single plan as an implicit task, withdrawing it if it is
    /// not admitted within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the task was withdrawn; otherwise see
    /// [`Database::exec`].
    pub fn exec_with_timeout(&self, plan: PlanRef, timeout: Duration) -> CoreResult<ExecResult> {
        let plans = vec![plan];
        let ty = TaskType::infer(&plans);
        self.submit(ty, TaskOrigin::Implicit, plans, Vec::new(), Some(timeout))
    }

    fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    fn submit(
        &self,
        ty: TaskType,
        origin: TaskOrigin,
        plans: Vec<PlanRef>,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> CoreResult<ExecResult> {
        self.ensure_open()?;
        let task = Task::new(self.next_task_id(), ty, origin, plans, params, &self.catalog)?;
        let outcome = self.runner.execute(task, timeout)?;
        self.after_commit(&outcome.written);
        Ok(ExecResult {
            task: outcome.task,
            results: outcome.results,
        })
    }

    /// Re-runs every observer the commit made stale.
    ///
    /// Runs on the committing caller's thread, after its locks are gone.
    fn after_commit(&self, written: &BTreeMap<TableId, Version>) {
        if written.is_empty() || !self.config.observer_reruns {
            return;
        }
        for id in self.observers.due(written) {
            self.stats.record_observer_rerun();
            if let Err(err) = self.observers.evaluate(
                id,
                self.next_task_id(),
                &self.runner,
                self.config.exec_timeout,
            ) {
                warn!(subscription = %id, error = %err, "observer re-run failed");
            }
        }
    }

    /// Registers a continuous query over a read plan.
    ///
    /// The plan is evaluated once before this returns; that result is the
    /// first event on the receiver.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a plan that writes, or the error of
    /// the initial evaluation. No subscription is kept in either case.
    pub fn subscribe(
        &self,
        plan: PlanRef,
        params: Vec<Value>,
    ) -> CoreResult<(SubscriptionId, Receiver<QueryEvent>)> {
        self.ensure_open()?;
        let (id, events) = self.observers.register(plan, params, &self.catalog)?;
        if let Err(err) =
            self.observers
                .evaluate(id, self.next_task_id(), &self.runner, self.config.exec_timeout)
        {
            self.observers.remove(id);
            return Err(err);
        }
        info!(subscription = %id, "observer registered");
        Ok((id, events))
    }

    /// Drops a continuous query.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` if the subscription is not live.
    pub fn unsubscribe(&self, id: SubscriptionId) -> CoreResult<()> {
        if self.observers.remove(id) {
            info!(subscription = %id, "observer removed");
            Ok(())
        } else {
            Err(CoreError::SubscriptionNotFound(id))
        }
    }

    /// Rebinds a continuous query's parameters and re-evaluates it.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` if the subscription is not live, or
    /// the error of the re-evaluation. A failed re-evaluation keeps the new
    /// parameters; the next commit retries.
    pub fn set_parameters(&self, id: SubscriptionId, params: Vec<Value>) -> CoreResult<()> {
        self.ensure_open()?;
        self.observers.set_parameters(id, params)?;
        self.stats.record_observer_rerun();
        self.observers
            .evaluate(id, self.next_task_id(), &self.runner, self.config.exec_timeout)?;
        Ok(())
    }

    /// Returns the live subscriptions.
    #[must_use]
    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Returns the current version of a table.
    #[must_use]
    pub fn version(&self, table: TableId) -> Version {
        self.runner.version(table)
    }

    /// Withdraws a pending task. Returns false if it is not pending.
    pub fn withdraw(&self, task: TaskId) -> bool {
        self.runner.withdraw(task)
    }

    /// Returns the ids of tasks waiting for admission, oldest first.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        self.runner.pending()
    }

    /// Returns the ids of tasks currently running.
    #[must_use]
    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.runner.running()
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns database statistics.
    #[must_use]
    pub fn stats(&self) -> &DatabaseStats {
        &self.stats
    }

    /// Closes the database.
    ///
    /// Pending tasks fail with `DatabaseClosed`; running tasks finish.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.runner.shutdown();
        *is_open = false;
        info!("database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Ensures the database is open.
    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("tables", &self.catalog.len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// An explicit transaction: an ordered list of plans committed atomically.
///
/// Consumed by [`Transaction::exec`].
#[derive(Debug)]
#[must_use = "a transaction does nothing until exec is called"]
pub struct Transaction<'db> {
    db: &'db Database,
    ty: TaskType,
    params: Vec<Value>,
    timeout: Option<Duration>,
}

impl Transaction<'_> {
    /// Returns the declared task type.
    pub fn task_type(&self) -> TaskType {
        self.ty
    }

    /// Binds parameters for the transaction's plans.
    pub fn params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Overrides the admission timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Schedules the plans as one task and waits for the result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a read-only transaction contains a
    /// write plan, the first failing plan's error after rollback, or a
    /// scheduling error if the task never ran.
    pub fn exec(self, plans: Vec<PlanRef>) -> CoreResult<ExecResult> {
        self.db
            .submit(self.ty, TaskOrigin::Explicit, plans, self.params, self.timeout)
    }
}
