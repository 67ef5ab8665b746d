use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::time::timeout;

use crate::error::TaskError;
use crate::executor::{RunStatus, TaskContext, TaskRunner};
use crate::notify::Notifier;
use crate::quality::{QualityLedger, SharedLedger, Validator};
use crate::record::{CanonicalRecord, RawRecord, WarehouseRow};
use crate::source::{read_all, RawSource};
use crate::warehouse::{AggregateQuery, QueryResult, WarehouseSink};

use super::report::{PipelineReport, Trigger};
use super::transform::transform_batch;

/// The fixed stages of the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Extract,
    Clean,
    CreateSchema,
    Transform,
    Load,
    Query,
    Notify,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Extract,
        Stage::Clean,
        Stage::CreateSchema,
        Stage::Transform,
        Stage::Load,
        Stage::Query,
        Stage::Notify,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Clean => "clean",
            Self::CreateSchema => "create_schema",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Query => "query",
            Self::Notify => "notify",
        }
    }

    pub fn dependencies(&self) -> &'static [Stage] {
        match self {
            Self::Extract | Self::CreateSchema => &[],
            Self::Clean => &[Stage::Extract],
            Self::Transform => &[Stage::Clean, Stage::CreateSchema],
            Self::Load => &[Stage::Transform],
            Self::Query => &[Stage::Load],
            Self::Notify => &[Stage::Query],
        }
    }

    /// Pure in-memory stages; retrying them cannot change the outcome.
    pub fn is_pure(&self) -> bool {
        matches!(self, Self::Clean | Self::Transform)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// One slot per stage output. Written by exactly one stage, read downstream.
#[derive(Debug)]
struct Slot<T>(Mutex<Option<Arc<T>>>);

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(Mutex::new(None))
    }
}

impl<T> Slot<T> {
    fn put(&self, value: T) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(value));
    }

    fn get(&self, produced_by: Stage) -> Result<Arc<T>, TaskError> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| TaskError::fatal(format!("output of stage '{produced_by}' is missing")))
    }
}

#[derive(Debug, Default)]
struct Artifacts {
    raw: Slot<Vec<RawRecord>>,
    clean: Slot<Vec<CanonicalRecord>>,
    rows: Slot<Vec<WarehouseRow>>,
    queries: Slot<Vec<QueryResult>>,
}

/// Everything the stages of one run share.
pub struct RunContext {
    pub run_id: String,
    pub pipeline: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub source: Arc<dyn RawSource>,
    pub sink: WarehouseSink,
    pub notifier: Arc<dyn Notifier>,
    pub validator: Validator,
    pub offset: FixedOffset,
    pub queries: Vec<AggregateQuery>,
    pub ledger: SharedLedger,
    /// Attempt budget of the notify stage; the last attempt never fails the run.
    pub notify_attempts: u32,
    /// Upper bound on one report delivery, kept below the notify stage timeout.
    pub notify_timeout: Duration,
    artifacts: Artifacts,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: String,
        pipeline: String,
        trigger: Trigger,
        source: Arc<dyn RawSource>,
        sink: WarehouseSink,
        notifier: Arc<dyn Notifier>,
        validator: Validator,
        offset: FixedOffset,
        queries: Vec<AggregateQuery>,
        sample_limit: usize,
        notify_attempts: u32,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            run_id,
            pipeline,
            trigger,
            started_at: Utc::now(),
            source,
            sink,
            notifier,
            validator,
            offset,
            queries,
            ledger: SharedLedger::new(sample_limit),
            notify_attempts: notify_attempts.max(1),
            notify_timeout,
            artifacts: Artifacts::default(),
        }
    }

    /// Query results produced so far, empty if the query stage has not run.
    pub fn query_results(&self) -> Vec<QueryResult> {
        self.artifacts
            .queries
            .get(Stage::Query)
            .map(|q| q.as_ref().clone())
            .unwrap_or_default()
    }

    /// Build a report for the current state of the run.
    pub fn report(&self, status: RunStatus) -> PipelineReport {
        PipelineReport {
            run_id: self.run_id.clone(),
            pipeline: self.pipeline.clone(),
            trigger: self.trigger,
            failed_task: super::report::failed_task_of(&status),
            status,
            ledger: self.ledger.summary(),
            queries: self.query_results(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Runs one [`Stage`] against a shared [`RunContext`].
pub struct StageRunner {
    stage: Stage,
    ctx: Arc<RunContext>,
}

impl StageRunner {
    pub fn new(stage: Stage, ctx: Arc<RunContext>) -> Self {
        Self { stage, ctx }
    }

    async fn extract(&self) -> Result<(), TaskError> {
        let source = Arc::clone(&self.ctx.source);
        let records = tokio::task::spawn_blocking(move || read_all(source.as_ref()))
            .await
            .map_err(|e| TaskError::fatal(format!("extract worker failed: {e}")))??;

        tracing::info!(
            run_id = %self.ctx.run_id,
            source = self.ctx.source.name(),
            records = records.len(),
            "extracted raw records"
        );
        self.ctx.artifacts.raw.put(records);
        Ok(())
    }

    fn clean(&self) -> Result<(), TaskError> {
        let raw = self.ctx.artifacts.raw.get(Stage::Extract)?;

        let mut ledger = QualityLedger::new(self.ctx.ledger.sample_limit());
        let clean = self.ctx.validator.clean_batch(&raw, &mut ledger);
        let summary = ledger.summary();
        self.ctx.ledger.replace_counts(ledger);

        tracing::info!(
            run_id = %self.ctx.run_id,
            accepted = summary.accepted,
            transformed = summary.transformed,
            rejected = summary.rejected,
            "validated batch"
        );
        self.ctx.artifacts.clean.put(clean);
        Ok(())
    }

    async fn create_schema(&self) -> Result<(), TaskError> {
        self.ctx.sink.store().create_schema().await?;
        Ok(())
    }

    fn transform(&self) -> Result<(), TaskError> {
        let clean = self.ctx.artifacts.clean.get(Stage::Clean)?;
        let rows = transform_batch(&clean, self.ctx.offset);
        tracing::debug!(run_id = %self.ctx.run_id, rows = rows.len(), "transformed rows");
        self.ctx.artifacts.rows.put(rows);
        Ok(())
    }

    async fn load(&self) -> Result<(), TaskError> {
        let rows = self.ctx.artifacts.rows.get(Stage::Transform)?;
        let result = self.ctx.sink.load(&rows).await?;
        self.ctx.ledger.record_load(result);
        Ok(())
    }

    async fn query(&self) -> Result<(), TaskError> {
        let mut results = Vec::with_capacity(self.ctx.queries.len());
        for query in &self.ctx.queries {
            let result = self.ctx.sink.store().run_query(*query).await?;
            tracing::debug!(
                run_id = %self.ctx.run_id,
                query = %query,
                rows = result.rows.len(),
                "query finished"
            );
            results.push(result);
        }
        self.ctx.artifacts.queries.put(results);
        Ok(())
    }

    async fn notify(&self, attempt: u32) -> Result<(), TaskError> {
        let report = self.ctx.report(RunStatus::Succeeded);
        let send = self.ctx.notifier.send(&report);
        let error = match timeout(self.ctx.notify_timeout, send).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "report delivery timed out after {}ms",
                self.ctx.notify_timeout.as_millis()
            ),
        };
        if attempt < self.ctx.notify_attempts {
            return Err(TaskError::recoverable(error));
        }
        // Loaded data stands; a lost report is only logged.
        tracing::warn!(
            run_id = %self.ctx.run_id,
            notifier = self.ctx.notifier.name(),
            attempt,
            error = %error,
            "report delivery failed, giving up"
        );
        Ok(())
    }
}

#[async_trait]
impl TaskRunner for StageRunner {
    async fn run(&self, task: TaskContext) -> Result<(), TaskError> {
        match self.stage {
            Stage::Extract => self.extract().await,
            Stage::Clean => self.clean(),
            Stage::CreateSchema => self.create_schema().await,
            Stage::Transform => self.transform(),
            Stage::Load => self.load().await,
            Stage::Query => self.query().await,
            Stage::Notify => self.notify(task.attempt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_shape_is_fixed() {
        let ids: Vec<_> = Stage::ALL.iter().map(Stage::id).collect();
        assert_eq!(
            ids,
            vec!["extract", "clean", "create_schema", "transform", "load", "query", "notify"]
        );
        assert!(Stage::CreateSchema.dependencies().is_empty());
        assert_eq!(
            Stage::Transform.dependencies(),
            &[Stage::Clean, Stage::CreateSchema]
        );
        assert!(Stage::Clean.is_pure());
        assert!(!Stage::Load.is_pure());
    }
}
