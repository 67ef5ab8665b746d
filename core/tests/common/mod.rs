#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use batchflow_core::config::AppConfig;
use batchflow_core::error::TaskError;
use batchflow_core::executor::RetryStrategyPlugin;
use batchflow_core::notify::RecordingNotifier;
use batchflow_core::pipeline::{PipelineDeps, RunCoordinator};
use batchflow_core::record::RawRecord;
use batchflow_core::source::InMemorySource;
use batchflow_core::warehouse::InMemoryWarehouse;
use chrono::NaiveDate;
use tokio::sync::watch;

/// Retries after a few milliseconds so retry scenarios stay fast.
pub struct QuickRetry;

impl RetryStrategyPlugin for QuickRetry {
    fn name(&self) -> &str {
        "quick"
    }

    fn next_delay(&self, _retry: u32, _error: &TaskError) -> Duration {
        Duration::from_millis(2)
    }
}

pub fn raw(id: &str, store: &str, amount: &str, date: &str) -> RawRecord {
    RawRecord::new()
        .with("transaction_id", id)
        .with("store_id", store)
        .with("category", "grocery")
        .with("amount", amount)
        .with("quantity", "1")
        .with("date", date)
}

/// Config with a fixed retention anchor and a 3-attempt budget.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.validation.as_of = NaiveDate::from_ymd_opt(2024, 3, 31);
    cfg.retry.max_attempts = 3;
    cfg.engine.max_parallel = 4;
    cfg
}

pub struct Harness {
    pub source: Arc<InMemorySource>,
    pub store: Arc<InMemoryWarehouse>,
    pub notifier: Arc<RecordingNotifier>,
    pub coordinator: RunCoordinator,
}

pub fn harness(records: Vec<RawRecord>) -> Harness {
    harness_with(records, test_config())
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,batchflow_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn harness_with(records: Vec<RawRecord>, cfg: AppConfig) -> Harness {
    init_test_tracing();
    let source = Arc::new(InMemorySource::new(records));
    let store = Arc::new(InMemoryWarehouse::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let deps = PipelineDeps {
        source: source.clone(),
        store: store.clone(),
        notifier: notifier.clone(),
        retry: Arc::new(QuickRetry),
    };
    let coordinator = RunCoordinator::new(cfg, deps).expect("valid config");
    Harness {
        source,
        store,
        notifier,
        coordinator,
    }
}

/// A cancel receiver that never fires.
pub fn never_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    rx
}
