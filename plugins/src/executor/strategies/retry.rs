use std::time::Duration;

use batchflow_core::error::TaskError;
use batchflow_core::executor::traits::RetryStrategyPlugin;
use batchflow_core::executor::types::RetryConfig;

pub struct ExponentialBackoffPlugin {
    config: RetryConfig,
}

pub struct LinearRetryPlugin {
    config: RetryConfig,
}

pub struct FixedDelayPlugin {
    config: RetryConfig,
}

impl ExponentialBackoffPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl LinearRetryPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl FixedDelayPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryStrategyPlugin for ExponentialBackoffPlugin {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    fn next_delay(&self, retry: u32, _error: &TaskError) -> Duration {
        let exp = 1u64 << retry.min(30);
        let delay = self.config.base_delay_ms.saturating_mul(exp);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }
}

impl RetryStrategyPlugin for LinearRetryPlugin {
    fn name(&self) -> &str {
        "linear"
    }

    fn next_delay(&self, retry: u32, _error: &TaskError) -> Duration {
        let multiplier = u64::from(retry.saturating_add(1));
        let delay = self.config.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }
}

impl RetryStrategyPlugin for FixedDelayPlugin {
    fn name(&self) -> &str {
        "fixed"
    }

    fn next_delay(&self, _retry: u32, _error: &TaskError) -> Duration {
        Duration::from_millis(self.config.base_delay_ms.min(self.config.max_delay_ms))
    }
}
