//! # Lockstep Core
//!
//! Transaction scheduling and atomic commit for Lockstep.
//!
//! The persisted store underneath Lockstep offers one atomic multi-record
//! write and nothing else: no locks, no isolation. This crate supplies the
//! rest in the application layer:
//! - Scope resolution: which tables a transaction reads and writes
//! - A reader/writer lock table with all-or-nothing grants
//! - A runner that admits, executes and releases tasks in FIFO order
//! - A per-task journal that stages writes and flushes the net diff atomically
//! - Continuous queries re-run on table version changes
//!
//! A minimal schema catalog, row codec and set of physical plans are
//! included so the engine can be driven end to end.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
mod journal;
mod lock;
mod observer;
mod plan;
mod record;
mod row;
mod schema;
mod scope;
mod stats;
mod task;
mod types;
mod value;

pub use config::Config;
pub use database::{Database, Transaction};
pub use error::{ConstraintKind, CoreError, CoreResult};
pub use journal::{CommitDiff, Journal, JournalView, TableJournal};
pub use lock::{LockEntry, LockTable};
pub use observer::{ObserverBinding, ObserverRegistry, QueryEvent};
pub use plan::{
    DeletePlan, Filter, GetPlan, InsertPlan, PhysicalPlan, PlanRef, PlanResult, ScanPlan,
    UpdatePlan,
};
pub use record::{encode_index_key, RowCodec};
pub use row::Row;
pub use schema::{
    Catalog, Column, ColumnType, ForeignKey, IndexDef, IndexKey, IndexKind, TableBuilder,
    TableSchema, PRIMARY_KEY_INDEX,
};
pub use scope::{compute_scope, TableScope};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use task::{ExecResult, Runner, Task, TaskOrigin, TaskOutcome, TaskState, TaskType};
pub use types::{RowId, SubscriptionId, TableId, TaskId, Version};
pub use value::Value;
