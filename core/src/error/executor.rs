use std::time::Duration;

use thiserror::Error;

use crate::executor::TaskState;

/// Graph construction and engine errors. Raised before or outside task
/// execution; a run never starts on any of these.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Duplicate task ID: {0}")]
    DuplicateTaskId(String),

    #[error("Dependency not found: task '{task_id}' depends on '{missing_dep}'")]
    DependencyNotFound {
        task_id: String,
        missing_dep: String,
    },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Task graph is empty")]
    EmptyGraph,

    #[error("Invalid transition for task '{task_id}': {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("Task worker was lost: {0}")]
    WorkerLost(String),
}

impl ExecutorError {
    /// True for errors caused by the task set itself rather than the engine.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTaskId(_)
                | Self::DependencyNotFound { .. }
                | Self::CircularDependency(_)
                | Self::EmptyGraph
        )
    }
}

/// Failure of one task attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure; the engine retries it while attempts remain.
    #[error("{0}")]
    Recoverable(String),

    /// Non-retryable failure; the task fails immediately.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl TaskError {
    pub fn recoverable(msg: impl Into<String>) -> Self {
        Self::Recoverable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}
