//! batchflow core: validation, idempotent warehouse loading and the
//! dependency-ordered run engine that drives them.

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod notify;
pub mod pipeline;
pub mod quality;
pub mod record;
pub mod source;
pub mod warehouse;

pub use error::{CliError, CoordinatorError, ExecutorError, TaskError};
pub use pipeline::{PipelineDeps, PipelineReport, RunCoordinator, RunOutcome, Trigger};
