//! Test fixtures and database helpers.
//!
//! Provides a three-table catalog, convenience plans over it and helpers
//! for staging contention between tasks.

use lockstep_core::{
    Catalog, ColumnType, Config, CoreResult, Database, DeletePlan, Filter, InsertPlan,
    JournalView, PhysicalPlan, PlanRef, PlanResult, ScanPlan, TableBuilder, TableId, UpdatePlan,
    Value,
};
use lockstep_storage::InMemoryAdapter;
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `user(id, email?)`, unique nullable email.
pub const USER: TableId = TableId::new(1);
/// `job(id, status)`, non-unique index on status.
pub const JOB: TableId = TableId::new(2);
/// `assignment(id, user -> user, job? -> job)`.
pub const ASSIGNMENT: TableId = TableId::new(3);

/// Position of `job.status`.
pub const JOB_STATUS: usize = 1;

/// Builds the fixture catalog.
pub fn test_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .add_table(
            TableBuilder::new(USER, "user")
                .column("id", ColumnType::Integer, false)
                .column("email", ColumnType::Text, true)
                .primary_key(&["id"])
                .index("by_email", &["email"], true)
                .build()
                .expect("valid user table"),
        )
        .expect("register user");
    catalog
        .add_table(
            TableBuilder::new(JOB, "job")
                .column("id", ColumnType::Integer, false)
                .column("status", ColumnType::Text, false)
                .primary_key(&["id"])
                .index("by_status", &["status"], false)
                .build()
                .expect("valid job table"),
        )
        .expect("register job");
    catalog
        .add_table(
            TableBuilder::new(ASSIGNMENT, "assignment")
                .column("id", ColumnType::Integer, false)
                .column("user", ColumnType::Integer, false)
                .column("job", ColumnType::Integer, true)
                .primary_key(&["id"])
                .foreign_key("user", USER)
                .foreign_key("job", JOB)
                .build()
                .expect("valid assignment table"),
        )
        .expect("register assignment");
    catalog
}

/// A test database that keeps a handle on its in-memory adapter.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The adapter under the database, for inspection and fault injection.
    pub adapter: Arc<InMemoryAdapter>,
}

impl TestDatabase {
    /// Creates a new in-memory test database with default configuration.
    pub fn memory() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a new in-memory test database.
    pub fn with_config(config: Config) -> Self {
        let adapter = Arc::new(InMemoryAdapter::new());
        let db = Database::open(test_catalog(), adapter.clone(), config)
            .expect("Failed to open in-memory database");
        Self { db, adapter }
    }

    /// Opens a second database over the same adapter.
    pub fn reopen(&self) -> Database {
        Database::open(test_catalog(), self.adapter.clone(), self.db.config().clone())
            .expect("Failed to reopen database")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use lockstep_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.exec(insert_job(1, "new")).unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Inserts `job(id, status)`.
pub fn insert_job(id: i64, status: &str) -> PlanRef {
    Arc::new(InsertPlan::one(JOB, vec![Value::Integer(id), Value::from(status)]))
}

/// Inserts `user(id, email)`.
pub fn insert_user(id: i64, email: Option<&str>) -> PlanRef {
    Arc::new(InsertPlan::one(USER, vec![Value::Integer(id), Value::from(email)]))
}

/// Inserts `assignment(id, user, job)`.
pub fn insert_assignment(id: i64, user: i64, job: Option<i64>) -> PlanRef {
    Arc::new(InsertPlan::one(
        ASSIGNMENT,
        vec![Value::Integer(id), Value::Integer(user), Value::from(job)],
    ))
}

/// Sets the status of the job with primary key `id`.
pub fn set_job_status(id: i64, status: &str) -> PlanRef {
    Arc::new(UpdatePlan::new(JOB, Filter::eq(0, id)).set(JOB_STATUS, status))
}

/// Deletes the job with primary key `id`.
pub fn delete_job(id: i64) -> PlanRef {
    Arc::new(DeletePlan::new(JOB, Filter::eq(0, id)))
}

/// Reads every row of a table.
pub fn scan(table: TableId) -> PlanRef {
    Arc::new(ScanPlan::new(table, Filter::All))
}

/// Reads jobs whose status equals parameter 0.
pub fn jobs_by_status() -> PlanRef {
    Arc::new(ScanPlan::new(JOB, Filter::eq_param(JOB_STATUS, 0)))
}

/// Returns the statuses of the rows in a result, in row order.
pub fn statuses(result: &PlanResult) -> Vec<String> {
    result
        .rows()
        .unwrap_or_default()
        .iter()
        .filter_map(|r| r.get(JOB_STATUS).and_then(Value::as_text).map(str::to_string))
        .collect()
}

/// A plan that blocks inside execution until its [`Gate`] opens.
///
/// Lets a test hold a task's locks for as long as it needs.
#[derive(Debug)]
pub struct GatePlan {
    table: TableId,
    write: bool,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

/// Opens a [`GatePlan`].
#[derive(Debug)]
pub struct Gate(mpsc::Sender<()>);

impl Gate {
    /// Lets the gated task continue.
    pub fn open(self) {
        let _ = self.0.send(());
    }
}

/// Creates a gate over `table`, declared as a write when `write` is set.
pub fn gate(table: TableId, write: bool) -> (PlanRef, Gate) {
    let (tx, rx) = mpsc::channel();
    let plan = GatePlan {
        table,
        write,
        gate: Mutex::new(Some(rx)),
    };
    (Arc::new(plan), Gate(tx))
}

impl PhysicalPlan for GatePlan {
    fn inputs(&self) -> Vec<TableId> {
        vec![self.table]
    }

    fn outputs(&self) -> Vec<TableId> {
        if self.write {
            vec![self.table]
        } else {
            Vec::new()
        }
    }

    fn execute(&self, _view: &mut JournalView<'_>) -> CoreResult<PlanResult> {
        if let Some(rx) = self.gate.lock().take() {
            // A dropped gate counts as open.
            let _ = rx.recv();
        }
        Ok(PlanResult::Affected(0))
    }
}

/// Polls `cond` until it holds. Panics after five seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Installs a `tracing` subscriber for tests.
///
/// Honours `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database holding jobs `1..=count`, all with `status`.
    pub fn populated_jobs(count: i64, status: &str) -> TestDatabase {
        let test_db = TestDatabase::memory();
        for id in 1..=count {
            test_db
                .exec(insert_job(id, status))
                .expect("Failed to insert job");
        }
        test_db
    }
}
