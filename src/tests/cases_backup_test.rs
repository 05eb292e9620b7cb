// Backup scheduling scenarios: cron ticks, overlap, failures, persistence.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::backup::MemoryBackupStore;
use crate::config::new_test_config;
use crate::error::ControllerError;
use crate::model::{BackupOutcome, BackupRecord};
use crate::registry::ControllerEvent;
use crate::tests::support::Stack;

const JOB: &str = "db-nightly";

fn at(ts: &str) -> DateTime<Utc> {
    ts.parse().expect("rfc3339 timestamp")
}

/// Default stack plus an hourly job against the same `db` target.
fn with_hourly() -> Stack {
    let mut cfg = new_test_config();
    let backups = cfg.controller.backups.as_mut().unwrap();
    let mut hourly = backups.jobs[0].clone();
    hourly.name = "db-hourly".to_string();
    hourly.schedule = "0 0 * * * *".to_string();
    backups.jobs.push(hourly);
    Stack::new(cfg)
}

/// Schedules the job from 02:00 so that 03:00 the same day is due.
fn primed() -> Stack {
    let stack = Stack::default_stack();
    assert!(stack.backups.tick(at("2025-01-01T02:00:00Z")).is_empty());
    stack
}

#[tokio::test(start_paused = true)]
async fn due_job_runs_and_is_persisted() {
    let stack = primed();
    let mut events = stack.registry.events();
    assert_eq!(
        stack.backups.record(JOB).unwrap().next_run,
        Some(at("2025-01-01T03:00:00Z"))
    );

    assert!(stack.backups.tick(at("2025-01-01T02:59:59Z")).is_empty());
    let runs = stack.backups.tick(at("2025-01-01T03:00:00Z"));
    assert_eq!(runs.len(), 1);
    for run in runs {
        assert_eq!(run.await.unwrap(), BackupOutcome::Success);
    }

    let record = stack.backups.record(JOB).unwrap();
    assert_eq!(record.last_outcome, Some(BackupOutcome::Success));
    assert_eq!(record.last_run, Some(at("2025-01-01T03:00:00Z")));
    assert_eq!(record.next_run, Some(at("2025-01-02T03:00:00Z")));
    assert_eq!(record.runs, 1);
    assert!(record.last_error.is_none());

    let stored = stack.store.get(JOB).unwrap();
    assert_eq!(stored.last_outcome, Some(BackupOutcome::Success));
    assert_eq!(stack.store.saves(), 2);
    assert_eq!(stack.orchestrator.calls_for("db"), vec!["trigger_job db db-nightly"]);

    assert_eq!(
        events.recv().await.unwrap(),
        ControllerEvent::BackupFinished {
            job: JOB.to_string(),
            outcome: BackupOutcome::Success,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn overlapping_tick_is_skipped() {
    let stack = primed();
    stack.orchestrator.set_job_duration(Duration::from_secs(600));

    let first = stack.backups.tick(at("2025-01-01T03:00:00Z"));
    assert_eq!(first.len(), 1);
    assert!(stack.backups.record(JOB).unwrap().is_pending());

    let second = stack.backups.tick(at("2025-01-02T03:00:00Z"));
    assert!(second.is_empty());
    let err = stack.backups.run_now(JOB).unwrap_err();
    assert!(matches!(err, ControllerError::JobAlreadyPending(_)));

    for run in first {
        assert_eq!(run.await.unwrap(), BackupOutcome::Success);
    }
    let record = stack.backups.record(JOB).unwrap();
    assert_eq!(record.runs, 1);
    assert_eq!(record.skipped, 1);
    assert_eq!(record.next_run, Some(at("2025-01-03T03:00:00Z")));
    assert_eq!(stack.orchestrator.calls_for("db").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_manual_triggers_yield_one_run() {
    let stack = Stack::default_stack();
    stack.orchestrator.set_job_duration(Duration::from_secs(60));

    let mut attempts = Vec::new();
    for _ in 0..8 {
        let backups = stack.backups.clone();
        attempts.push(tokio::spawn(async move {
            backups.run_now(JOB).map(|(_, run)| run)
        }));
    }

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(run) => accepted.push(run),
            Err(ControllerError::JobAlreadyPending(_)) => rejected += 1,
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(accepted.len(), 1);
    assert_eq!(rejected, 7);
    for run in accepted {
        assert_eq!(run.await.unwrap(), BackupOutcome::Success);
    }
}

#[tokio::test(start_paused = true)]
async fn failure_does_not_halt_schedule() {
    let stack = primed();
    stack.orchestrator.set_job_failure(Some("disk full"));

    for run in stack.backups.tick(at("2025-01-01T03:00:00Z")) {
        assert_eq!(run.await.unwrap(), BackupOutcome::Failure);
    }
    let record = stack.backups.record(JOB).unwrap();
    assert_eq!(record.last_outcome, Some(BackupOutcome::Failure));
    assert!(record.last_error.as_deref().unwrap_or_default().contains("disk full"));

    stack.orchestrator.set_job_failure(None);
    let runs = stack.backups.tick(at("2025-01-02T03:00:00Z"));
    assert_eq!(runs.len(), 1);
    for run in runs {
        assert_eq!(run.await.unwrap(), BackupOutcome::Success);
    }
    let record = stack.backups.record(JOB).unwrap();
    assert_eq!(record.runs, 2);
    assert!(record.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn slow_job_times_out() {
    let stack = primed();
    stack.orchestrator.set_job_duration(Duration::from_secs(2 * 3600));

    for run in stack.backups.tick(at("2025-01-01T03:00:00Z")) {
        assert_eq!(run.await.unwrap(), BackupOutcome::Failure);
    }
    let record = stack.backups.record(JOB).unwrap();
    assert!(record.last_error.unwrap().contains("timed out"));
    assert!(!stack.backups.record(JOB).unwrap().is_pending());

    assert_eq!(stack.orchestrator.open_jobs(), 0);
    let calls = stack.orchestrator.calls_for("db");
    assert!(calls.iter().any(|c| c.starts_with("cancel_job db")), "{calls:?}");
}

#[tokio::test(start_paused = true)]
async fn finished_jobs_are_forgotten() {
    let stack = primed();
    for run in stack.backups.tick(at("2025-01-01T03:00:00Z")) {
        assert_eq!(run.await.unwrap(), BackupOutcome::Success);
    }
    assert_eq!(stack.orchestrator.open_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn one_run_per_target_across_jobs() {
    let stack = with_hourly();
    stack.orchestrator.set_job_duration(Duration::from_secs(600));

    let (_, nightly) = stack.backups.run_now(JOB).unwrap();
    match stack.backups.run_now("db-hourly") {
        Err(ControllerError::JobAlreadyPending(holder)) => assert_eq!(holder, JOB),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("second run against db must be rejected"),
    }
    assert!(!stack.backups.record("db-hourly").unwrap().is_pending());

    assert_eq!(nightly.await.unwrap(), BackupOutcome::Success);
    let (_, hourly) = stack.backups.run_now("db-hourly").unwrap();
    assert_eq!(hourly.await.unwrap(), BackupOutcome::Success);
    assert_eq!(stack.orchestrator.calls_for("db").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn due_jobs_on_busy_target_are_skipped() {
    let stack = with_hourly();
    stack.orchestrator.set_job_duration(Duration::from_secs(600));
    assert!(stack.backups.tick(at("2025-01-01T02:30:00Z")).is_empty());

    // Both jobs are due at 03:00; only one may run against db.
    let runs = stack.backups.tick(at("2025-01-01T03:00:00Z"));
    assert_eq!(runs.len(), 1);
    let pending: Vec<String> = stack
        .backups
        .records()
        .into_iter()
        .filter(|r| r.is_pending())
        .map(|r| r.job)
        .collect();
    assert_eq!(pending.len(), 1);
    let skipped: u64 = stack.backups.records().iter().map(|r| r.skipped).sum();
    assert_eq!(skipped, 1);
    assert_eq!(stack.orchestrator.calls_for("db").len(), 1);

    for run in runs {
        assert_eq!(run.await.unwrap(), BackupOutcome::Success);
    }
    let runs = stack.backups.tick(at("2025-01-01T04:00:00Z"));
    assert_eq!(runs.len(), 1);
    assert_eq!(stack.backups.record("db-hourly").unwrap().runs, 2);
}

#[tokio::test(start_paused = true)]
async fn trigger_error_is_recorded() {
    let stack = primed();
    stack.orchestrator.fail_operation("db", "trigger_job");

    for run in stack.backups.tick(at("2025-01-01T03:00:00Z")) {
        assert_eq!(run.await.unwrap(), BackupOutcome::Failure);
    }
    assert!(stack
        .backups
        .record(JOB)
        .unwrap()
        .last_error
        .unwrap()
        .contains("injected failure"));
}

#[tokio::test(start_paused = true)]
async fn restore_marks_interrupted_run_failed() {
    let mut saved = BackupRecord::new(JOB.into(), "db".into(), "0 0 3 * * *".into());
    saved.last_outcome = Some(BackupOutcome::Pending);
    saved.last_run = Some(at("2024-12-31T03:00:00Z"));
    saved.runs = 4;
    let store = Arc::new(MemoryBackupStore::with_records(vec![saved]));
    let stack = Stack::with_store(new_test_config(), store.clone());

    let restored = stack.backups.restore(at("2025-01-01T12:00:00Z")).await.unwrap();

    assert_eq!(restored, 1);
    let record = stack.backups.record(JOB).unwrap();
    assert_eq!(record.last_outcome, Some(BackupOutcome::Failure));
    assert!(record.last_error.unwrap().contains("interrupted"));
    assert_eq!(record.runs, 4);
    assert_eq!(record.last_run, Some(at("2024-12-31T03:00:00Z")));
    assert_eq!(record.next_run, Some(at("2025-01-02T03:00:00Z")));
    assert_eq!(store.get(JOB).unwrap().last_outcome, Some(BackupOutcome::Failure));
}

#[tokio::test(start_paused = true)]
async fn unknown_job_is_rejected() {
    let stack = Stack::default_stack();
    let err = stack.backups.run_now("wal-archive").unwrap_err();
    assert!(matches!(err, ControllerError::UnknownJob(_)));
}
