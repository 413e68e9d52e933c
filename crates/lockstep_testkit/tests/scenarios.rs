//! End-to-end scheduling scenarios.

use lockstep_core::{TaskType, Value, Version};
use lockstep_testkit::prelude::*;
use std::sync::Arc;
use std::thread;

/// A reader queued behind a writer sees the writer's row.
#[test]
fn reader_waits_for_overlapping_writer() {
    init_tracing();
    let test_db = TestDatabase::memory();
    let db = Arc::new(test_db.db);

    let (hold, gate) = gate(JOB, true);
    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            db.create_transaction(TaskType::ReadWrite)
                .exec(vec![insert_job(1, "new"), hold])
        })
    };
    wait_until(|| db.running_tasks().len() == 1);
    let writer_id = db.running_tasks()[0];

    let reader = {
        let db = Arc::clone(&db);
        thread::spawn(move || db.exec(scan(JOB)))
    };
    wait_until(|| db.pending_tasks().len() == 1);
    assert_eq!(db.running_tasks(), vec![writer_id]);

    gate.open();
    writer.join().unwrap().unwrap();
    let read = reader.join().unwrap().unwrap();

    assert_eq!(statuses(&read.results[0]), vec!["new"]);
    assert_eq!(db.version(JOB), Version::new(1));
}

/// Writers of disjoint tables run together and bump only their own tables.
#[test]
fn disjoint_writers_run_concurrently() {
    init_tracing();
    let test_db = TestDatabase::memory();
    let db = Arc::new(test_db.db);

    let (hold_jobs, jobs_gate) = gate(JOB, true);
    let (hold_users, users_gate) = gate(USER, true);

    let jobs = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            db.create_transaction(TaskType::ReadWrite)
                .exec(vec![insert_job(1, "new"), hold_jobs])
        })
    };
    let users = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            db.create_transaction(TaskType::ReadWrite)
                .exec(vec![insert_user(1, Some("a@example.com")), hold_users])
        })
    };

    wait_until(|| db.running_tasks().len() == 2);
    assert!(db.pending_tasks().is_empty());

    jobs_gate.open();
    users_gate.open();
    jobs.join().unwrap().unwrap();
    users.join().unwrap().unwrap();

    assert_eq!(db.version(JOB), Version::new(1));
    assert_eq!(db.version(USER), Version::new(1));
    assert_eq!(db.version(ASSIGNMENT), Version::new(0));
}

/// A commit that leaves a filtered result unchanged still re-runs it.
#[test]
fn observer_reruns_on_version_not_result() {
    init_tracing();
    let test_db = TestDatabase::memory();
    let (id, events) = test_db
        .subscribe(jobs_by_status(), vec![Value::from("new")])
        .unwrap();

    let initial = events.recv().unwrap();
    assert!(initial.result.rows().unwrap().is_empty());
    assert_eq!(initial.versions[&JOB], Version::new(0));

    test_db.exec(insert_job(1, "old")).unwrap();

    let rerun = events.recv().unwrap();
    assert_eq!(rerun.subscription, id);
    assert_eq!(rerun.result, initial.result);
    assert_eq!(rerun.versions[&JOB], Version::new(1));
    assert_eq!(test_db.observers().last_versions(id).unwrap()[&JOB], Version::new(1));
}

/// Insert then delete of the same row inside one task writes nothing.
#[test]
fn insert_then_delete_leaves_no_trace() {
    init_tracing();
    let test_db = TestDatabase::memory();
    let before = test_db.adapter.write_count();

    test_db
        .create_transaction(TaskType::ReadWrite)
        .exec(vec![insert_job(5, "new"), delete_job(5)])
        .unwrap();

    assert_eq!(test_db.adapter.write_count(), before);
    assert_eq!(test_db.adapter.snapshot().row_count(JOB.as_u32()), 0);
    assert_eq!(test_db.version(JOB), Version::new(0));
}

/// A job referenced by an assignment cannot be deleted.
#[test]
fn referenced_job_survives_delete() {
    init_tracing();
    let test_db = TestDatabase::memory();
    test_db.exec(insert_user(1, None)).unwrap();
    test_db.exec(insert_job(1, "new")).unwrap();
    test_db.exec(insert_assignment(1, 1, Some(1))).unwrap();

    assert!(test_db.exec(delete_job(1)).is_err());
    let jobs = test_db.exec(scan(JOB)).unwrap();
    assert_eq!(statuses(&jobs.results[0]), vec!["new"]);
}

/// A task that cannot be admitted in time is withdrawn without effect.
#[test]
fn blocked_task_times_out() {
    init_tracing();
    let test_db = TestDatabase::memory();
    let db = Arc::new(test_db.db);

    let (hold, gate) = gate(JOB, true);
    let holder = {
        let db = Arc::clone(&db);
        thread::spawn(move || db.exec(hold))
    };
    wait_until(|| db.running_tasks().len() == 1);

    let err = db
        .exec_with_timeout(insert_job(1, "late"), std::time::Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, lockstep_core::CoreError::Timeout { .. }));
    assert!(db.pending_tasks().is_empty());
    assert_eq!(db.stats().tasks_withdrawn(), 1);

    gate.open();
    holder.join().unwrap().unwrap();
    assert!(statuses(&db.exec(scan(JOB)).unwrap().results[0]).is_empty());
}
