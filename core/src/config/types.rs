use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::executor::types::{EngineConfig, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub events_out: EventsOutConfig,
}

fn default_pipeline_name() -> String {
    "daily-transactions".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            retry: RetryConfig::default(),
            validation: ValidationConfig::default(),
            source: SourceConfig::default(),
            warehouse: WarehouseConfig::default(),
            transform: TransformConfig::default(),
            query: QueryConfig::default(),
            notify: NotifyConfig::default(),
            events_out: EventsOutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "batchflow_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Records dated more than this many days before the run date are rejected.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Records dated more than this many days after the run date are rejected.
    #[serde(default = "default_future_tolerance_days")]
    pub future_tolerance_days: u32,

    /// Maximum number of rejections kept verbatim in the ledger.
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,

    /// Date the retention window is measured from. Defaults to the run date
    /// in the reporting offset.
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

fn default_retention_days() -> u32 {
    365
}

fn default_future_tolerance_days() -> u32 {
    1
}

fn default_sample_limit() -> usize {
    50
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            future_tolerance_days: default_future_tolerance_days(),
            sample_limit: default_sample_limit(),
            as_of: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the raw transaction file.
    #[serde(default)]
    pub path: Option<String>,

    /// Explicit format; inferred from the file extension when unset.
    #[serde(default)]
    pub format: Option<SourceFormat>,
}

impl SourceConfig {
    pub fn resolved_format(&self) -> SourceFormat {
        if let Some(format) = self.format {
            return format;
        }
        match self.path.as_deref() {
            Some(p) if p.ends_with(".jsonl") || p.ends_with(".ndjson") => SourceFormat::Jsonl,
            _ => SourceFormat::Csv,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// `sqlite://path.db`, `sqlite::memory:` or `memory`.
    #[serde(default = "default_warehouse_url")]
    pub url: String,

    #[serde(default = "default_warehouse_table")]
    pub table: String,

    /// Rows per transaction. Unset loads the whole batch atomically.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

fn default_warehouse_url() -> String {
    "sqlite://batchflow.db".to_string()
}

fn default_warehouse_table() -> String {
    "transactions".to_string()
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            url: default_warehouse_url(),
            table: default_warehouse_table(),
            batch_size: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Offset of the reporting timezone; business dates are computed in it.
    #[serde(default)]
    pub reporting_utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_names")]
    pub names: Vec<String>,
}

fn default_query_names() -> Vec<String> {
    vec![
        "sales_by_category".to_string(),
        "sales_by_store".to_string(),
        "daily_totals".to_string(),
    ]
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            names: default_query_names(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    #[default]
    Log,
    Jsonl,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub kind: NotifyKind,

    /// Report file for the `jsonl` notifier.
    #[serde(default = "default_report_path")]
    pub path: String,

    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_report_path() -> String {
    "./reports.jsonl".to_string()
}

fn default_notify_timeout_secs() -> u64 {
    10
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            kind: NotifyKind::default(),
            path: default_report_path(),
            webhook_url: None,
            headers: BTreeMap::new(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsOutConfig {
    pub enabled: bool,
    /// File path, or `stdout:` to write events to standard output.
    pub path: String,
    pub channel_capacity: usize,
    /// Drop events instead of waiting when the writer falls behind.
    pub drop_when_full: bool,
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./run.events.jsonl".to_string(),
            channel_capacity: 1024,
            drop_when_full: true,
        }
    }
}
