//! Property tests over the scheduler and journal.

use lockstep_core::{
    CoreError, CoreResult, JournalView, PhysicalPlan, PlanRef, PlanResult, TableId, TaskType,
    Value, Version,
};
use lockstep_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

/// Reads the job count and inserts the next job id.
///
/// Two of these interleaving would both read the same count and the second
/// insert would breach the primary key.
#[derive(Debug)]
struct AppendNext;

impl PhysicalPlan for AppendNext {
    fn inputs(&self) -> Vec<TableId> {
        vec![JOB]
    }

    fn outputs(&self) -> Vec<TableId> {
        vec![JOB]
    }

    fn execute(&self, view: &mut JournalView<'_>) -> CoreResult<PlanResult> {
        let count = view.scan(JOB)?.len() as i64;
        view.insert(JOB, vec![Value::Integer(count + 1), Value::from("new")])?;
        Ok(PlanResult::Affected(1))
    }
}

fn as_model(result: &PlanResult) -> JobModel {
    result
        .rows()
        .unwrap_or_default()
        .iter()
        .map(|row| {
            (
                row.get(0).and_then(Value::as_integer).unwrap(),
                row.get(JOB_STATUS).and_then(Value::as_text).unwrap().to_string(),
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn overlapping_commits_are_totally_ordered(threads in 2usize..5, per_thread in 1usize..8) {
        let test_db = TestDatabase::memory();
        let db = Arc::new(test_db.db);

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        let plan: PlanRef = Arc::new(AppendNext);
                        db.exec(plan).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total = (threads * per_thread) as i64;
        let jobs = as_model(&db.exec(scan(JOB)).unwrap().results[0]);
        prop_assert_eq!(jobs.keys().copied().collect::<Vec<_>>(), (1..=total).collect::<Vec<_>>());
        prop_assert_eq!(db.version(JOB), Version::new(total as u64));
    }

    #[test]
    fn committed_tasks_are_visible_to_later_reads(tasks in task_batch_strategy(8)) {
        let mut harness = IntegrationHarness::new();
        for ops in &tasks {
            let _ = harness.run(ops);
            harness.verify_all();
        }
        prop_assert_eq!(harness.committed() + harness.rolled_back(), tasks.len());
    }

    #[test]
    fn failed_flush_leaves_no_trace(tasks in task_batch_strategy(8), fail_every in 1usize..4) {
        let test_db = TestDatabase::memory();
        for (n, ops) in tasks.iter().enumerate() {
            let plans: Vec<PlanRef> = ops.iter().map(JobOperation::to_plan).collect();
            let before = test_db.adapter.snapshot();
            let version = test_db.version(JOB);
            let inject = n % fail_every == 0;
            if inject {
                test_db.adapter.fail_next_writes(1);
            }

            let result = test_db.create_transaction(TaskType::infer(&plans)).exec(plans);
            test_db.adapter.fail_next_writes(0);

            match result {
                Ok(_) => prop_assert!(test_db.version(JOB) >= version),
                Err(err) => {
                    if inject {
                        let expected = matches!(
                            err,
                            CoreError::AdapterWriteFailure { .. } | CoreError::ConstraintViolation { .. }
                        );
                        prop_assert!(expected, "unexpected error {:?}", err);
                    }
                    prop_assert_eq!(test_db.adapter.snapshot(), before);
                    prop_assert_eq!(test_db.version(JOB), version);
                }
            }
        }
        prop_assert!(test_db.pending_tasks().is_empty());
        prop_assert!(test_db.running_tasks().is_empty());
    }

    #[test]
    fn tasks_read_their_own_writes(seed in task_batch_strategy(4), ops in operation_sequence_strategy(1, 8)) {
        let mut harness = IntegrationHarness::new();
        for setup in &seed {
            let _ = harness.run(setup);
        }
        let before = harness.model().clone();

        let mut plans: Vec<PlanRef> = ops.iter().map(JobOperation::to_plan).collect();
        plans.push(scan(JOB));
        let result = harness.db.create_transaction(TaskType::infer(&plans)).exec(plans);

        match replay(&before, &ops) {
            Some(expected) => {
                let result = result.unwrap();
                prop_assert_eq!(as_model(result.results.last().unwrap()), expected);
            }
            None => prop_assert!(result.is_err()),
        }
    }
}
