//! Property-based test generators using proptest.
//!
//! Provides strategies for generating job operations and task batches
//! over the fixture catalog.

use crate::fixtures::{delete_job, insert_job, scan, set_job_status, JOB};
use lockstep_core::PlanRef;
use proptest::prelude::*;

/// Statuses a generated job can take.
pub const STATUSES: &[&str] = &["new", "queued", "running", "done", "failed"];

/// Strategy for generating job primary keys.
///
/// Keys come from a small range so operations collide often.
pub fn job_id_strategy() -> impl Strategy<Value = i64> {
    1i64..16
}

/// Strategy for generating job statuses.
pub fn status_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(STATUSES).prop_map(str::to_string)
}

/// An operation against the `job` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOperation {
    /// Insert a job
    Insert {
        /// Primary key
        id: i64,
        /// Initial status
        status: String,
    },
    /// Change the status of a job
    SetStatus {
        /// Primary key
        id: i64,
        /// New status
        status: String,
    },
    /// Delete a job
    Delete {
        /// Primary key
        id: i64,
    },
    /// Read the whole table
    Scan,
}

impl JobOperation {
    /// Returns the plan performing this operation.
    pub fn to_plan(&self) -> PlanRef {
        match self {
            Self::Insert { id, status } => insert_job(*id, status),
            Self::SetStatus { id, status } => set_job_status(*id, status),
            Self::Delete { id } => delete_job(*id),
            Self::Scan => scan(JOB),
        }
    }

    /// Returns true if the operation writes.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Scan)
    }
}

/// Strategy for generating job operations.
pub fn job_operation_strategy() -> impl Strategy<Value = JobOperation> {
    prop_oneof![
        3 => (job_id_strategy(), status_strategy())
            .prop_map(|(id, status)| JobOperation::Insert { id, status }),
        3 => (job_id_strategy(), status_strategy())
            .prop_map(|(id, status)| JobOperation::SetStatus { id, status }),
        1 => job_id_strategy().prop_map(|id| JobOperation::Delete { id }),
        1 => Just(JobOperation::Scan),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<JobOperation>> {
    prop::collection::vec(job_operation_strategy(), min_ops..max_ops)
}

/// Strategy for generating tasks, each a short run of operations.
pub fn task_batch_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<JobOperation>>> {
    prop::collection::vec(operation_sequence_strategy(1, 5), 1..max_tasks)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn status_is_known(status in status_strategy()) {
            prop_assert!(STATUSES.contains(&status.as_str()));
        }

        #[test]
        fn write_operations_declare_job_output(op in job_operation_strategy()) {
            let plan = op.to_plan();
            prop_assert_eq!(plan.inputs(), vec![JOB]);
            if op.is_write() {
                prop_assert_eq!(plan.outputs(), vec![JOB]);
            } else {
                prop_assert!(plan.outputs().is_empty());
            }
        }

        #[test]
        fn task_batches_are_never_empty(tasks in task_batch_strategy(6)) {
            prop_assert!(!tasks.is_empty());
            prop_assert!(tasks.iter().all(|ops| !ops.is_empty()));
        }
    }
}
