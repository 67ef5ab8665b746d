use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::{FailureReason, RunReport, RunStatus};
use crate::quality::LedgerSummary;
use crate::warehouse::QueryResult;

/// What started a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Manual,
    Scheduled,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// The task that made a run fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task_id: String,
    pub attempts: u32,
    pub error: String,
}

/// Report delivered to the notifier and printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub pipeline: String,
    pub trigger: Trigger,
    pub status: RunStatus,
    pub ledger: LedgerSummary,
    pub queries: Vec<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_task: Option<FailedTask>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// One-line human summary for logs and the CLI.
    pub fn headline(&self) -> String {
        let outcome = match &self.status {
            RunStatus::Succeeded => "succeeded".to_string(),
            RunStatus::Failed {
                reason: FailureReason::Cancelled,
            } => "cancelled".to_string(),
            RunStatus::Failed {
                reason: FailureReason::TaskFailed {
                    task_id, attempts, ..
                },
            } => format!("failed at '{task_id}' after {attempts} attempt(s)"),
            RunStatus::Failed {
                reason: FailureReason::Engine { error },
            } => format!("aborted: {error}"),
        };
        let load = self.ledger.load.unwrap_or_default();
        format!(
            "run {} {}: accepted={} transformed={} rejected={} inserted={} updated={} skipped={}",
            self.run_id,
            outcome,
            self.ledger.accepted,
            self.ledger.transformed,
            self.ledger.rejected,
            load.inserted,
            load.updated,
            load.skipped,
        )
    }
}

/// Terminal outcome of one coordinated run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: PipelineReport,
    pub run: RunReport,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }

    /// Process exit status for this outcome: 0, 30 (failed) or 31 (cancelled).
    pub fn exit_code(&self) -> i32 {
        match &self.report.status {
            RunStatus::Succeeded => 0,
            RunStatus::Failed {
                reason: FailureReason::Cancelled,
            } => 31,
            RunStatus::Failed { .. } => 30,
        }
    }
}

pub(crate) fn failed_task_of(status: &RunStatus) -> Option<FailedTask> {
    match status {
        RunStatus::Failed {
            reason:
                FailureReason::TaskFailed {
                    task_id,
                    attempts,
                    error,
                },
        } => Some(FailedTask {
            task_id: task_id.clone(),
            attempts: *attempts,
            error: error.clone(),
        }),
        _ => None,
    }
}
