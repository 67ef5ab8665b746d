use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::state::{SkipReason, TaskState};

/// Per-task bookkeeping owned by the engine for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub state: TaskState,

    /// Attempts started so far.
    pub attempts: u32,

    /// Error of the most recent failed attempt.
    pub last_error: Option<String>,

    pub skip_reason: Option<SkipReason>,

    /// Wall time spent running, summed over attempts.
    pub duration_ms: u64,
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self {
            state: TaskState::Pending,
            attempts: 0,
            last_error: None,
            skip_reason: None,
            duration_ms: 0,
        }
    }
}

/// One state change, in the order the engine applied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub task_id: String,
    pub from: TaskState,
    pub to: TaskState,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    TaskFailed {
        task_id: String,
        attempts: u32,
        error: String,
    },
    Cancelled,
    /// The engine itself broke down mid-run.
    Engine {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed { reason: FailureReason },
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                reason: FailureReason::Cancelled
            }
        )
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub tasks: BTreeMap<String, TaskRecord>,
    pub timeline: Vec<Transition>,
    pub stages: Vec<Vec<String>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.get(task_id).map(|r| r.state)
    }

    pub fn attempts_of(&self, task_id: &str) -> u32 {
        self.tasks.get(task_id).map(|r| r.attempts).unwrap_or(0)
    }

    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks_in(TaskState::Failed)
    }

    pub fn tasks_in(&self, state: TaskState) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, r)| r.state == state)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Order in which tasks were first dispatched.
    pub fn dispatch_order(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for t in &self.timeline {
            if t.to == TaskState::Running && !seen.contains(&t.task_id.as_str()) {
                seen.push(t.task_id.as_str());
            }
        }
        seen
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
