use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Run engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum tasks running at the same time.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout applied to tasks without an explicit one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Per-task timeout overrides, keyed by task id.
    #[serde(default)]
    pub task_timeouts_secs: BTreeMap<String, u64>,
}

fn default_max_parallel() -> usize {
    num_cpus::get().clamp(1, 8)
}

fn default_timeout_secs() -> u64 {
    300
}

impl EngineConfig {
    pub fn timeout_for(&self, task_id: &str) -> Duration {
        let secs = self
            .task_timeouts_secs
            .get(task_id)
            .copied()
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_timeout_secs: default_timeout_secs(),
            task_timeouts_secs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// `exponential-backoff`, `linear` or `fixed`.
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total attempts per task, first run included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_retry_strategy() -> String {
    "exponential-backoff".to_string()
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}
