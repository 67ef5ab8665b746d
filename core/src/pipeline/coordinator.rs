use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{FixedOffset, NaiveDate, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{CoordinatorError, ExecutorError, SourceError};
use crate::events::{EventBus, RunEvent};
use crate::executor::{
    FailureReason, RetryStrategyPlugin, RunEngine, RunStatus, Task, TaskGraph,
};
use crate::notify::Notifier;
use crate::quality::{LedgerSummary, QualityLedger, Validator};
use crate::source::{read_all, RawSource};
use crate::warehouse::{AggregateQuery, WarehouseSink, WarehouseStore};

use super::report::{PipelineReport, RunOutcome, Trigger};
use super::stages::{RunContext, Stage, StageRunner};
use super::transform::reporting_offset;

/// External collaborators a pipeline run talks to.
#[derive(Clone)]
pub struct PipelineDeps {
    pub source: Arc<dyn RawSource>,
    pub store: Arc<dyn WarehouseStore>,
    pub notifier: Arc<dyn Notifier>,
    pub retry: Arc<dyn RetryStrategyPlugin>,
}

/// Owns pipeline executions: builds the stage graph per run, drives it
/// through the engine and reports the outcome. At most one run at a time.
pub struct RunCoordinator {
    config: AppConfig,
    deps: PipelineDeps,
    engine: RunEngine,
    queries: Vec<AggregateQuery>,
    offset: FixedOffset,
    active: Arc<Mutex<Option<String>>>,
}

/// Clears the active-run slot when the run ends, however it ends.
struct ActiveRun(Arc<Mutex<Option<String>>>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl RunCoordinator {
    /// Fails on configuration no run could succeed with: unknown query
    /// names or an out-of-range reporting offset.
    pub fn new(config: AppConfig, deps: PipelineDeps) -> Result<Self, CoordinatorError> {
        let queries = config
            .query
            .names
            .iter()
            .map(|name| AggregateQuery::from_str(name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoordinatorError::Config(e.to_string()))?;
        let offset = reporting_offset(config.transform.reporting_utc_offset_minutes)
            .map_err(|e| CoordinatorError::Config(e.to_string()))?;
        let engine = RunEngine::new(config.engine.max_parallel, EventBus::default());

        Ok(Self {
            config,
            deps,
            engine,
            queries,
            offset,
            active: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        self.engine.events()
    }

    /// Id of the run in progress, if any.
    pub fn active_run(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn claim(&self, run_id: &str) -> Result<ActiveRun, CoordinatorError> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.as_ref() {
            return Err(CoordinatorError::RunInProgress(current.clone()));
        }
        *slot = Some(run_id.to_string());
        Ok(ActiveRun(Arc::clone(&self.active)))
    }

    /// The date the retention window is measured from for a run started now.
    pub fn as_of(&self) -> NaiveDate {
        self.config
            .validation
            .as_of
            .unwrap_or_else(|| Utc::now().with_timezone(&self.offset).date_naive())
    }

    fn validator(&self) -> Validator {
        Validator::new(&self.config.validation, self.as_of())
    }

    fn build_tasks(&self, ctx: &Arc<RunContext>) -> Vec<Task> {
        Stage::ALL
            .iter()
            .map(|stage| {
                let attempts = if stage.is_pure() {
                    1
                } else {
                    self.config.retry.max_attempts
                };
                Task::new(
                    stage.id(),
                    Arc::new(StageRunner::new(*stage, Arc::clone(ctx))),
                    Arc::clone(&self.deps.retry),
                )
                .depends_on(stage.dependencies().iter().map(Stage::id))
                .max_attempts(attempts)
                .timeout(self.config.engine.timeout_for(stage.id()))
            })
            .collect()
    }

    fn new_context(&self, run_id: &str, trigger: Trigger) -> Arc<RunContext> {
        // Leave headroom under the stage timeout so a hung send is settled
        // by the notify stage rather than by the engine.
        let notify_timeout = self.config.engine.timeout_for(Stage::Notify.id()) * 4 / 5;
        Arc::new(RunContext::new(
            run_id.to_string(),
            self.config.pipeline_name.clone(),
            trigger,
            Arc::clone(&self.deps.source),
            WarehouseSink::new(Arc::clone(&self.deps.store), self.config.warehouse.batch_size),
            Arc::clone(&self.deps.notifier),
            self.validator(),
            self.offset,
            self.queries.clone(),
            self.config.validation.sample_limit,
            self.config.retry.max_attempts,
            notify_timeout,
        ))
    }

    /// Execute the pipeline once.
    ///
    /// Rejects the trigger with [`CoordinatorError::RunInProgress`] while
    /// another run is active. A failed or cancelled run is still an `Ok`
    /// outcome; the report inside names what went wrong.
    pub async fn start_run(
        &self,
        trigger: Trigger,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunOutcome, CoordinatorError> {
        let run_id = Uuid::new_v4().to_string();
        let _active = self.claim(&run_id)?;

        let ctx = self.new_context(&run_id, trigger);
        let graph = TaskGraph::build(&self.build_tasks(&ctx))?;
        let stages = graph.topological_sort()?;

        tracing::info!(
            run_id = %run_id,
            pipeline = %self.config.pipeline_name,
            trigger = %trigger,
            as_of = %ctx.validator.as_of(),
            "pipeline run started"
        );
        self.events().emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            pipeline: self.config.pipeline_name.clone(),
            stages,
            timestamp: Utc::now(),
        });

        match self.engine.execute(&run_id, &graph, cancel).await {
            Ok(run) => {
                let report = self.finish_run(&ctx, run.status.clone()).await;
                Ok(RunOutcome { report, run })
            }
            Err(e) if e.is_configuration() => {
                self.abort_run(&ctx, &e).await;
                Err(CoordinatorError::Graph(e))
            }
            Err(e) => {
                self.abort_run(&ctx, &e).await;
                Err(CoordinatorError::Engine(e))
            }
        }
    }

    /// Report a run the engine could not carry to the end. The partial
    /// ledger still goes out with the failure report.
    async fn abort_run(&self, ctx: &RunContext, error: &ExecutorError) -> PipelineReport {
        tracing::error!(run_id = %ctx.run_id, error = %error, "run engine failed");
        self.finish_run(
            ctx,
            RunStatus::Failed {
                reason: FailureReason::Engine {
                    error: error.to_string(),
                },
            },
        )
        .await
    }

    async fn finish_run(&self, ctx: &RunContext, status: RunStatus) -> PipelineReport {
        let report = ctx.report(status.clone());
        self.events().emit(RunEvent::QualitySummary {
            run_id: ctx.run_id.clone(),
            summary: report.ledger.clone(),
            timestamp: Utc::now(),
        });

        if !report.is_success() {
            self.send_failure_report(&report).await;
        }

        tracing::info!(
            run_id = %ctx.run_id,
            success = report.is_success(),
            duration_ms = report.duration_ms(),
            "{}",
            report.headline()
        );
        self.events().emit(RunEvent::RunFinished {
            run_id: ctx.run_id.clone(),
            status,
            duration_ms: report.duration_ms(),
            timestamp: Utc::now(),
        });
        report
    }

    async fn send_failure_report(&self, report: &PipelineReport) {
        if let Err(e) = self.deps.notifier.send(report).await {
            tracing::warn!(
                run_id = %report.run_id,
                notifier = self.deps.notifier.name(),
                error = %e,
                "failed to deliver failure report"
            );
        }
    }

    /// Validate the source without touching the warehouse.
    pub async fn dry_run(&self) -> Result<LedgerSummary, SourceError> {
        let validator = self.validator();
        let source = Arc::clone(&self.deps.source);
        let records = tokio::task::spawn_blocking(move || read_all(source.as_ref()))
            .await
            .map_err(|e| SourceError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let mut ledger = QualityLedger::new(self.config.validation.sample_limit);
        validator.clean_batch(&records, &mut ledger);
        Ok(ledger.summary())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::TaskError;
    use crate::notify::RecordingNotifier;
    use crate::record::RawRecord;
    use crate::source::InMemorySource;
    use crate::warehouse::InMemoryWarehouse;

    struct NoDelay;

    impl RetryStrategyPlugin for NoDelay {
        fn name(&self) -> &str {
            "none"
        }

        fn next_delay(&self, _retry: u32, _error: &TaskError) -> Duration {
            Duration::ZERO
        }
    }

    fn raw(id: &str, amount: &str) -> RawRecord {
        RawRecord::new()
            .with("transaction_id", id)
            .with("store_id", "s1")
            .with("category", "grocery")
            .with("amount", amount)
            .with("quantity", "1")
            .with("date", "2024-03-30")
    }

    #[tokio::test]
    async fn engine_failure_still_reports_partial_ledger() {
        let mut cfg = AppConfig::default();
        cfg.validation.as_of = NaiveDate::from_ymd_opt(2024, 3, 31);
        let notifier = Arc::new(RecordingNotifier::new());
        let deps = PipelineDeps {
            source: Arc::new(InMemorySource::new(vec![])),
            store: Arc::new(InMemoryWarehouse::new()),
            notifier: notifier.clone(),
            retry: Arc::new(NoDelay),
        };
        let coordinator = RunCoordinator::new(cfg, deps).unwrap();
        let mut events = coordinator.events().subscribe();

        let ctx = coordinator.new_context("r1", Trigger::Manual);
        let mut ledger = QualityLedger::new(ctx.ledger.sample_limit());
        ctx.validator
            .clean_batch(&[raw("t1", "10.00"), raw("t2", "ten")], &mut ledger);
        // The run dies before load; only the validation counts exist.
        ctx.ledger.replace_counts(ledger);

        let report = coordinator
            .abort_run(&ctx, &ExecutorError::WorkerLost("load".into()))
            .await;
        assert!(matches!(
            report.status,
            RunStatus::Failed {
                reason: FailureReason::Engine { .. }
            }
        ));

        let sent = notifier.reports();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].ledger.accepted, 1);
        assert_eq!(sent[0].ledger.rejected, 1);
        assert!(!sent[0].is_success());

        match events.recv().await.unwrap() {
            RunEvent::QualitySummary { run_id, summary, .. } => {
                assert_eq!(run_id, "r1");
                assert_eq!(summary.accepted, 1);
            }
            other => panic!("expected quality summary, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            RunEvent::RunFinished { status, .. } => assert_eq!(status, report.status),
            other => panic!("expected run finished, got {other:?}"),
        }
    }
}
