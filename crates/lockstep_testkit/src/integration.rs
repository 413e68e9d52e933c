//! Cross-crate integration test helpers.
//!
//! Provides a harness that runs job operations through the database and
//! mirrors every committed task in a plain model, so any divergence
//! between the two shows up on the next verification.

use crate::fixtures::{TestDatabase, JOB, JOB_STATUS};
use crate::generators::JobOperation;
use lockstep_core::{ConstraintKind, CoreError, CoreResult, ExecResult, PlanRef, TaskType, Value};
use std::collections::BTreeMap;

/// Jobs by primary key, holding their status.
pub type JobModel = BTreeMap<i64, String>;

/// Applies `ops` to a copy of `model` as one task would.
///
/// Returns `None` when the task must roll back: inserting a key that is
/// already present breaches the primary key. Updates and deletes of
/// missing keys match nothing and succeed.
pub fn replay(model: &JobModel, ops: &[JobOperation]) -> Option<JobModel> {
    let mut next = model.clone();
    for op in ops {
        match op {
            JobOperation::Insert { id, status } => {
                if next.insert(*id, status.clone()).is_some() {
                    return None;
                }
            }
            JobOperation::SetStatus { id, status } => {
                if let Some(slot) = next.get_mut(id) {
                    slot.clone_from(status);
                }
            }
            JobOperation::Delete { id } => {
                next.remove(id);
            }
            JobOperation::Scan => {}
        }
    }
    Some(next)
}

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The database under test.
    pub db: TestDatabase,
    /// Committed state as the model sees it.
    model: JobModel,
    committed: usize,
    rolled_back: usize,
}

impl IntegrationHarness {
    /// Creates a new integration harness with an in-memory database.
    pub fn new() -> Self {
        Self {
            db: TestDatabase::memory(),
            model: JobModel::new(),
            committed: 0,
            rolled_back: 0,
        }
    }

    /// Runs `ops` as one explicit task and updates the model to match.
    ///
    /// Panics if the database and the model disagree on whether the task
    /// commits.
    pub fn run(&mut self, ops: &[JobOperation]) -> CoreResult<ExecResult> {
        let plans: Vec<PlanRef> = ops.iter().map(JobOperation::to_plan).collect();
        let ty = TaskType::infer(&plans);
        let result = self.db.create_transaction(ty).exec(plans);
        let expected = replay(&self.model, ops);

        match (&result, expected) {
            (Ok(_), Some(next)) => {
                self.model = next;
                self.committed += 1;
            }
            (
                Err(CoreError::ConstraintViolation {
                    kind: ConstraintKind::PrimaryKey,
                    ..
                }),
                None,
            ) => {
                self.rolled_back += 1;
            }
            (outcome, expected) => panic!(
                "database and model disagree for {ops:?}: db {outcome:?}, model commits: {}",
                expected.is_some()
            ),
        }
        result
    }

    /// Reads the committed `job` table back as a model.
    pub fn read_back(&self) -> JobModel {
        let result = self
            .db
            .exec(crate::fixtures::scan(JOB))
            .expect("Failed to scan jobs");
        result.results[0]
            .rows()
            .unwrap_or_default()
            .iter()
            .map(|row| {
                let id = row.get(0).and_then(Value::as_integer).expect("job id");
                let status = row
                    .get(JOB_STATUS)
                    .and_then(Value::as_text)
                    .expect("job status");
                (id, status.to_string())
            })
            .collect()
    }

    /// Verifies the database holds exactly the modelled jobs.
    pub fn verify_all(&self) {
        assert_eq!(self.read_back(), self.model, "job table diverged from model");
        assert_eq!(
            self.db.adapter.snapshot().row_count(JOB.as_u32()),
            self.model.len(),
            "persisted row count diverged from model"
        );
    }

    /// Returns the modelled jobs.
    pub fn model(&self) -> &JobModel {
        &self.model
    }

    /// Returns how many tasks committed.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Returns how many tasks rolled back.
    pub fn rolled_back(&self) -> usize {
        self.rolled_back
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(id: i64, status: &str) -> JobOperation {
        JobOperation::Insert {
            id,
            status: status.to_string(),
        }
    }

    #[test]
    fn test_replay_rejects_duplicate_insert() {
        let ops = vec![insert(1, "new"), insert(1, "new")];
        assert!(replay(&JobModel::new(), &ops).is_none());
    }

    #[test]
    fn test_replay_delete_then_insert() {
        let mut model = JobModel::new();
        model.insert(1, "old".to_string());
        let ops = vec![JobOperation::Delete { id: 1 }, insert(1, "new")];
        let next = replay(&model, &ops).unwrap();
        assert_eq!(next.get(&1).map(String::as_str), Some("new"));
    }

    #[test]
    fn test_harness_tracks_commits_and_rollbacks() {
        let mut harness = IntegrationHarness::new();
        harness.run(&[insert(1, "new"), insert(2, "new")]).unwrap();
        assert!(harness.run(&[insert(3, "new"), insert(1, "dup")]).is_err());
        harness
            .run(&[JobOperation::SetStatus {
                id: 2,
                status: "done".to_string(),
            }])
            .unwrap();

        assert_eq!(harness.committed(), 2);
        assert_eq!(harness.rolled_back(), 1);
        assert_eq!(harness.model().len(), 2);
        harness.verify_all();
    }
}
