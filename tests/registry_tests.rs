//! Job lifecycle tests against the registry task, without the TCP layer.

#![cfg(unix)]

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{
    assert_eventually, missing_worker, noop_worker, sample_params, sleeping_worker,
    spawn_registry, CapturedLogs, HISTORY_FILE,
};
use shake_server::config::WorkerConfig;
use shake_server::error::ShakeError;
use shake_server::scheduler::{Job, JobParams, JobStatus, JobStore, SubmitOutcome};

#[tokio::test]
async fn test_submit_assigns_ids_matching_table_length() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());

    for expected in 1..=3u64 {
        let outcome = registry.submit(sample_params()).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted(expected));
        assert_eq!(registry.list().await.unwrap().len() as u64, expected);
    }
}

#[tokio::test]
async fn test_submitted_job_is_persisted_pending() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());
    let params = sample_params().with_mechanism(Some(30.0), Some(45.0), None);

    let id = registry.submit(params.clone()).await.unwrap().job_id();

    let job = registry.info(id).await.unwrap().expect("job should exist");
    assert_eq!(job.id, 1);
    assert_eq!(job.params, params);
    assert!(!job.completed);
    assert_eq!(job.status(), JobStatus::Pending);

    // The file is the source of truth
    let on_disk = JobStore::new(dir.path().join(HISTORY_FILE)).load().await.unwrap();
    assert_eq!(on_disk, vec![job]);
}

#[tokio::test]
async fn test_complete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());
    let id = registry.submit(sample_params()).await.unwrap().job_id();

    assert!(registry.complete(id).await.unwrap());
    let first = registry.info(id).await.unwrap().unwrap();
    assert!(first.completed);

    assert!(registry.complete(id).await.unwrap());
    let second = registry.info(id).await.unwrap().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());

    assert!(registry.info(42).await.unwrap().is_none());
    assert!(!registry.complete(42).await.unwrap());
    assert!(!registry.delete(42).await.unwrap());
    assert!(!registry.expire(42, "timed out").await.unwrap());
}

#[tokio::test]
async fn test_delete_removes_exactly_one_job() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());
    for _ in 0..3 {
        registry.submit(sample_params()).await.unwrap();
    }

    assert!(registry.delete(2).await.unwrap());
    let ids: Vec<u64> = registry.list().await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![1, 3]);

    assert!(!registry.delete(2).await.unwrap());
    assert_eq!(registry.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_ids_are_not_reused_after_delete() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());
    registry.submit(sample_params()).await.unwrap();
    registry.submit(sample_params()).await.unwrap();

    assert!(registry.delete(2).await.unwrap());
    assert!(registry.delete(1).await.unwrap());

    let outcome = registry.submit(sample_params()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Accepted(3));
}

#[tokio::test]
async fn test_reset_empties_table_and_restarts_ids() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());
    for _ in 0..4 {
        registry.submit(sample_params()).await.unwrap();
    }

    registry.reset().await.unwrap();
    assert!(registry.list().await.unwrap().is_empty());

    // Reset on an empty table is fine too
    registry.reset().await.unwrap();

    let outcome = registry.submit(sample_params()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Accepted(1));
}

#[tokio::test]
async fn test_ids_continue_from_existing_table() {
    let dir = tempfile::tempdir().unwrap();
    let store = JobStore::new(dir.path().join(HISTORY_FILE));
    let existing: Vec<Job> = [1, 2, 5]
        .into_iter()
        .map(|id| Job::with_timestamp(id, sample_params(), "2025-01-01 00:00:00".to_string()))
        .collect();
    store.save(&existing).await.unwrap();

    let registry = spawn_registry(dir.path(), noop_worker());
    let outcome = registry.submit(sample_params()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Accepted(6));
    assert_eq!(registry.list().await.unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submits_get_distinct_ids() {
    const N: u64 = 50;
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());

    let handles: Vec<_> = (0..N)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let params = JobParams::new(4.0 + i as f64 / 10.0, 12.3, 45.1, 10.0);
                registry.submit(params).await.unwrap().job_id()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }

    let expected: HashSet<u64> = (1..=N).collect();
    assert_eq!(ids, expected);

    let jobs = registry.list().await.unwrap();
    assert_eq!(jobs.len() as u64, N);
    let stored: HashSet<u64> = jobs.iter().map(|j| j.id).collect();
    assert_eq!(stored, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());
    for _ in 0..20 {
        registry.submit(sample_params()).await.unwrap();
    }

    let handles: Vec<_> = (1..=20u64)
        .map(|id| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.complete(id).await.unwrap() })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let jobs = registry.list().await.unwrap();
    assert!(jobs.iter().all(|j| j.completed));
}

#[tokio::test]
async fn test_spawn_failure_marks_job_failed() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), missing_worker());

    let outcome = registry.submit(sample_params()).await.unwrap();
    let SubmitOutcome::SpawnFailed { id, reason } = outcome else {
        panic!("expected spawn failure, got {:?}", outcome);
    };
    assert_eq!(id, 1);
    assert!(!reason.is_empty());

    let job = registry.info(1).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.failure.unwrap().contains("could not be started"));

    // The failed record keeps its ID
    let next = registry.submit(sample_params()).await.unwrap();
    assert_eq!(next.job_id(), 2);
}

#[tokio::test]
async fn test_worker_timeout_expires_job() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), sleeping_worker().with_timeout_secs(1));
    let id = registry.submit(sample_params()).await.unwrap().job_id();

    assert_eq!(
        registry.info(id).await.unwrap().unwrap().status(),
        JobStatus::Pending
    );

    assert_eventually(
        || async { registry.info(id).await.unwrap().unwrap().status() == JobStatus::Failed },
        Duration::from_secs(5),
        "Timed out worker should fail its job",
    )
    .await;

    let job = registry.info(id).await.unwrap().unwrap();
    assert!(job.failure.unwrap().contains("timed out"));

    // A late completion report still wins
    assert!(registry.complete(id).await.unwrap());
    let job = registry.info(id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert!(job.failure.is_none());
}

#[tokio::test]
async fn test_timeout_from_before_reset_spares_new_job() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), sleeping_worker().with_timeout_secs(2));
    assert_eq!(
        registry.submit(sample_params()).await.unwrap(),
        SubmitOutcome::Accepted(1)
    );

    tokio::time::sleep(Duration::from_millis(1500)).await;
    registry.reset().await.unwrap();
    assert_eq!(
        registry.submit(sample_params()).await.unwrap(),
        SubmitOutcome::Accepted(1)
    );

    // Past the first worker's deadline, well within the second's
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let job = registry.info(1).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Pending, "failure: {:?}", job.failure);

    // The new job still times out on its own schedule
    assert_eventually(
        || async { registry.info(1).await.unwrap().unwrap().status() == JobStatus::Failed },
        Duration::from_secs(5),
        "New job should time out after its own deadline",
    )
    .await;
}

#[tokio::test]
async fn test_manual_expire_applies_after_reset() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());
    registry.submit(sample_params()).await.unwrap();
    registry.reset().await.unwrap();
    registry.submit(sample_params()).await.unwrap();

    // Operator-issued expiry carries no generation and still applies
    assert!(registry.expire(1, "operator").await.unwrap());
    assert_eq!(
        registry.info(1).await.unwrap().unwrap().status(),
        JobStatus::Failed
    );
}

#[tokio::test]
async fn test_expire_store_failure_is_logged() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), sleeping_worker().with_timeout_secs(1));
    let id = registry.submit(sample_params()).await.unwrap().job_id();
    std::fs::write(dir.path().join(HISTORY_FILE), "{ not a table").unwrap();

    assert_eventually(
        || {
            let logs = &logs;
            async move { logs.contents().contains("Failed to mark timed out job failed") }
        },
        Duration::from_secs(5),
        "Store failure while expiring should be logged",
    )
    .await;
    assert!(logs.contents().contains(&format!("job_id={}", id)));
}

#[tokio::test]
async fn test_completed_job_is_not_expired() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());
    let id = registry.submit(sample_params()).await.unwrap().job_id();

    registry.complete(id).await.unwrap();
    assert!(!registry.expire(id, "timed out").await.unwrap());
    assert_eq!(
        registry.info(id).await.unwrap().unwrap().status(),
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_worker_exit_does_not_complete_job() {
    let dir = tempfile::tempdir().unwrap();
    let registry = spawn_registry(dir.path(), WorkerConfig::new("false"));
    let id = registry.submit(sample_params()).await.unwrap().job_id();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        registry.info(id).await.unwrap().unwrap().status(),
        JobStatus::Pending
    );
}

#[tokio::test]
async fn test_corrupt_table_surfaces_as_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(HISTORY_FILE), "{ not a table").unwrap();
    let registry = spawn_registry(dir.path(), noop_worker());

    assert!(matches!(registry.list().await, Err(ShakeError::Json(_))));
    assert!(matches!(
        registry.submit(sample_params()).await,
        Err(ShakeError::Json(_))
    ));

    // Reset rewrites the table from scratch
    registry.reset().await.unwrap();
    assert!(registry.list().await.unwrap().is_empty());
}
