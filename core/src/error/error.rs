use thiserror::Error;

use super::executor::{ExecutorError, TaskError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("coordinator failed: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("a run is already active (run_id={0})")]
    RunInProgress(String),
    #[error("invalid task graph: {0}")]
    Graph(#[from] ExecutorError),
    #[error("run engine failed: {0}")]
    Engine(ExecutorError),
    #[error("invalid pipeline config: {0}")]
    Config(String),
}

/// Errors raised by a warehouse store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("unique key conflict on '{0}'")]
    Conflict(String),
    #[error("unknown query: {0}")]
    UnknownQuery(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for TaskError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(_) | StorageError::Conflict(_) | StorageError::Backend(_) => {
                TaskError::Recoverable(err.to_string())
            }
            StorageError::Schema(_) | StorageError::UnknownQuery(_) => {
                TaskError::Fatal(err.to_string())
            }
        }
    }
}

/// Errors raised while reading raw records.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed input at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

impl From<SourceError> for TaskError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Io(_) => TaskError::Recoverable(err.to_string()),
            SourceError::Malformed { .. } => TaskError::Fatal(err.to_string()),
        }
    }
}

/// Errors raised by a notifier. Logged, never fatal to a run.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
    #[error("notification io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
