#[allow(clippy::module_inception)]
pub mod error;
pub mod executor;

pub use error::{CliError, CoordinatorError, NotifyError, SourceError, StorageError};
pub use executor::{ExecutorError, TaskError};
