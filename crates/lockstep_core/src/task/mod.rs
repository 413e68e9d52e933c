//! Tasks and the scheduler that runs them.
//!
//! Lockstep serializes conflicting work with per-table locks granted at
//! admission:
//! - **Atomicity**: a task's writes reach storage in one atomic batch or not at all
//! - **Isolation**: conflicting tasks never overlap; readers see only committed data
//! - **Ordering**: commits to a table are totally ordered by its version counter

mod env;
mod runner;
mod state;

pub(crate) use env::{ExecEnv, RowIdAllocator};
pub use runner::{Runner, TaskOutcome};
pub use state::{ExecResult, Task, TaskOrigin, TaskState, TaskType};
