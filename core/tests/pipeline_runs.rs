mod common;

use batchflow_core::error::{CoordinatorError, NotifyError};
use batchflow_core::events::RunEvent;
use batchflow_core::executor::{FailureReason, RunStatus, TaskState};
use batchflow_core::notify::Notifier;
use batchflow_core::pipeline::{PipelineDeps, PipelineReport, RunCoordinator, Trigger};
use batchflow_core::record::RawRecord;
use batchflow_core::source::InMemorySource;
use batchflow_core::warehouse::{InMemoryWarehouse, WarehouseStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use common::{harness, never_cancel, raw, test_config, QuickRetry};

fn batch() -> Vec<RawRecord> {
    vec![
        raw("T-1", "S-1", "10.00", "2024-03-10"),
        raw("T-2", "S-1", "5.50", "2024-03-11"),
        raw("T-3", "S-2", "$1,200.00", "03/12/2024"),
    ]
}

#[tokio::test]
async fn repeated_runs_leave_identical_warehouse() {
    let h = harness(batch());

    let first = h
        .coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();
    assert!(first.is_success());
    let after_first = h.store.fetch_all().await.unwrap();

    let second = h
        .coordinator
        .start_run(Trigger::Scheduled, never_cancel())
        .await
        .unwrap();
    assert!(second.is_success());
    let after_second = h.store.fetch_all().await.unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.len(), 3);

    let load = second.report.ledger.load.unwrap();
    assert_eq!((load.inserted, load.updated, load.skipped), (0, 0, 3));
    assert_ne!(first.report.run_id, second.report.run_id);
}

#[tokio::test]
async fn duplicate_and_negative_amount_land_in_ledger() {
    let h = harness(vec![
        raw("1", "S-1", "10.00", "2024-03-10"),
        raw("1", "S-1", "10.00", "2024-03-10"),
        raw("2", "S-1", "-3.00", "2024-03-10"),
    ]);

    let outcome = h
        .coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();

    let ledger = &outcome.report.ledger;
    assert_eq!(
        (ledger.accepted, ledger.transformed, ledger.rejected),
        (1, 1, 1)
    );
    assert_eq!(ledger.total(), 3);
    assert_eq!(h.store.row_count().await.unwrap(), 1);
    assert_eq!(ledger.samples[0].position, Some(2));
}

#[tokio::test]
async fn load_recovers_within_attempt_budget() {
    let h = harness(batch());
    h.store.fail_next_upserts(2);

    let outcome = h
        .coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.run.attempts_of("load"), 3);
    assert_eq!(outcome.run.state_of("query"), Some(TaskState::Succeeded));
    assert_eq!(outcome.run.state_of("notify"), Some(TaskState::Succeeded));

    let reports = h.notifier.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_success());
    assert_eq!(reports[0].queries.len(), 3);
}

#[tokio::test]
async fn exhausted_load_fails_run_and_reports_failure() {
    let h = harness(batch());
    h.store.fail_next_upserts(3);

    let outcome = h
        .coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();

    assert!(!outcome.is_success());
    assert_eq!(outcome.exit_code(), 30);
    assert_eq!(outcome.run.state_of("load"), Some(TaskState::Failed));
    assert_eq!(outcome.run.attempts_of("load"), 3);
    assert_eq!(outcome.run.state_of("query"), Some(TaskState::Skipped));
    assert_eq!(outcome.run.state_of("notify"), Some(TaskState::Skipped));
    // upstream work stands
    assert_eq!(outcome.run.state_of("clean"), Some(TaskState::Succeeded));
    assert_eq!(outcome.report.ledger.accepted, 3);

    let reports = h.notifier.reports();
    assert_eq!(reports.len(), 1);
    let failed = reports[0].failed_task.as_ref().unwrap();
    assert_eq!(failed.task_id, "load");
    assert_eq!(failed.attempts, 3);
    assert_eq!(h.store.row_count().await.unwrap(), 0);
}

#[tokio::test]
async fn transient_source_failure_is_retried() {
    let h = harness(batch());
    h.source.fail_next_opens(1);

    let outcome = h
        .coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.run.attempts_of("extract"), 2);
    assert_eq!(h.store.row_count().await.unwrap(), 3);
}

#[tokio::test]
async fn notifier_outage_does_not_fail_the_run() {
    let h = harness(batch());
    h.notifier.fail_next_sends(10);

    let outcome = h
        .coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.run.attempts_of("notify"), 3);
    assert_eq!(h.store.row_count().await.unwrap(), 3);
}

#[tokio::test]
async fn reload_with_changed_content_updates_row() {
    let h = harness(batch());
    h.coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();

    // Same store, new amount for T-1.
    let source = Arc::new(InMemorySource::new(vec![
        raw("T-1", "S-1", "11.00", "2024-03-10"),
        raw("T-2", "S-1", "5.50", "2024-03-11"),
    ]));
    let deps = PipelineDeps {
        source,
        store: h.store.clone(),
        notifier: h.notifier.clone(),
        retry: Arc::new(QuickRetry),
    };
    let h2 = RunCoordinator::new(test_config(), deps).unwrap();

    let outcome = h2.start_run(Trigger::Manual, never_cancel()).await.unwrap();
    let load = outcome.report.ledger.load.unwrap();
    assert_eq!((load.inserted, load.updated, load.skipped), (0, 1, 1));
    assert_eq!(h.store.row_count().await.unwrap(), 3);
}

#[tokio::test]
async fn concurrent_trigger_is_rejected() {
    let h = harness(batch());

    let (a, b) = tokio::join!(
        h.coordinator.start_run(Trigger::Manual, never_cancel()),
        h.coordinator.start_run(Trigger::Scheduled, never_cancel()),
    );

    assert!(a.unwrap().is_success());
    assert!(matches!(b, Err(CoordinatorError::RunInProgress(_))));
    assert!(h.coordinator.active_run().is_none());

    // the slot is free again once the first run ends
    let again = h
        .coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();
    assert!(again.is_success());
}

#[tokio::test]
async fn cancelled_run_loads_nothing() {
    let h = harness(batch());
    let (_tx, rx) = watch::channel(true);

    let outcome = h.coordinator.start_run(Trigger::Manual, rx).await.unwrap();

    assert_eq!(outcome.exit_code(), 31);
    assert!(matches!(
        outcome.report.status,
        RunStatus::Failed {
            reason: FailureReason::Cancelled
        }
    ));
    assert!(outcome
        .run
        .tasks
        .values()
        .all(|t| t.state == TaskState::Skipped));
    assert_eq!(h.store.upsert_calls(), 0);
}

#[tokio::test]
async fn publishes_run_lifecycle_events() {
    let h = harness(batch());
    let mut rx = h.coordinator.events().subscribe();

    h.coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(match ev {
            RunEvent::RunStarted { .. } => "started",
            RunEvent::TaskStateChanged { .. } => "task",
            RunEvent::RetryScheduled { .. } => "retry",
            RunEvent::QualitySummary { .. } => "summary",
            RunEvent::RunFinished { .. } => "finished",
        });
    }
    assert_eq!(kinds.first(), Some(&"started"));
    assert_eq!(kinds.last(), Some(&"finished"));
    assert!(kinds.contains(&"summary"));
    // 7 tasks, each ready -> running -> succeeded
    assert_eq!(kinds.iter().filter(|k| **k == "task").count(), 21);
}

/// Never answers within any sane stage timeout.
struct HangingNotifier;

#[async_trait::async_trait]
impl Notifier for HangingNotifier {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn send(&self, _report: &PipelineReport) -> Result<(), NotifyError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn hung_notifier_on_last_attempt_does_not_fail_the_run() {
    common::init_test_tracing();
    let mut cfg = test_config();
    cfg.retry.max_attempts = 1;
    cfg.engine.task_timeouts_secs.insert("notify".into(), 1);
    let store = Arc::new(InMemoryWarehouse::new());
    let deps = PipelineDeps {
        source: Arc::new(InMemorySource::new(batch())),
        store: store.clone(),
        notifier: Arc::new(HangingNotifier),
        retry: Arc::new(QuickRetry),
    };
    let coordinator = RunCoordinator::new(cfg, deps).unwrap();

    let outcome = coordinator
        .start_run(Trigger::Manual, never_cancel())
        .await
        .unwrap();

    assert!(outcome.is_success(), "{}", outcome.report.headline());
    assert_eq!(outcome.run.state_of("notify"), Some(TaskState::Succeeded));
    assert_eq!(store.row_count().await.unwrap(), 3);
}
