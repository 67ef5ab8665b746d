use std::time::Duration;

use crate::error::TaskError;

/// Backoff policy consulted by the engine after a failed attempt.
pub trait RetryStrategyPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Delay before the next attempt. `retry` is 0 for the first retry.
    fn next_delay(&self, retry: u32, error: &TaskError) -> Duration;

    /// Errors the strategy refuses to retry, on top of [`TaskError::Fatal`].
    fn is_fatal_error(&self, _error: &TaskError) -> bool {
        false
    }

    fn should_retry(&self, attempts: u32, max_attempts: u32, error: &TaskError) -> bool {
        attempts < max_attempts && error.is_retryable() && !self.is_fatal_error(error)
    }
}
