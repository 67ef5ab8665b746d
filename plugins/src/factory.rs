use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use batchflow_core::config::{AppConfig, NotifyConfig, NotifyKind, SourceFormat};
use batchflow_core::executor::{RetryConfig, RetryStrategyPlugin};
use batchflow_core::notify::Notifier;
use batchflow_core::source::RawSource;
use batchflow_core::warehouse::{InMemoryWarehouse, WarehouseStore};
use batchflow_core::PipelineDeps;

use crate::executor::{ExponentialBackoffPlugin, FixedDelayPlugin, LinearRetryPlugin};
use crate::notify::{JsonlFileNotifier, LogNotifier, WebhookNotifier};
use crate::source::{CsvFileSource, JsonlFileSource};
use crate::warehouse::SqliteWarehouse;

pub fn build_retry_strategy(cfg: &RetryConfig) -> Arc<dyn RetryStrategyPlugin> {
    match cfg.strategy.as_str() {
        "exponential-backoff" => Arc::new(ExponentialBackoffPlugin::new(cfg.clone())),
        "linear" => Arc::new(LinearRetryPlugin::new(cfg.clone())),
        "fixed" => Arc::new(FixedDelayPlugin::new(cfg.clone())),
        other => {
            tracing::warn!(strategy = %other, "unknown retry strategy, using exponential-backoff");
            Arc::new(ExponentialBackoffPlugin::new(cfg.clone()))
        }
    }
}

pub fn build_source(cfg: &AppConfig) -> Result<Arc<dyn RawSource>> {
    let path = cfg
        .source
        .path
        .as_deref()
        .ok_or_else(|| anyhow!("source.path is not configured"))?;

    match cfg.source.resolved_format() {
        SourceFormat::Csv => Ok(Arc::new(CsvFileSource::new(path))),
        SourceFormat::Jsonl => Ok(Arc::new(JsonlFileSource::new(path))),
    }
}

/// `memory` keeps rows in process; anything else is a sqlite url.
pub async fn build_store(cfg: &AppConfig) -> Result<Arc<dyn WarehouseStore>> {
    if cfg.warehouse.url == "memory" {
        return Ok(Arc::new(InMemoryWarehouse::new()));
    }
    let store = SqliteWarehouse::connect(&cfg.warehouse.url, &cfg.warehouse.table).await?;
    Ok(Arc::new(store))
}

pub fn build_notifier(cfg: &NotifyConfig) -> Result<Arc<dyn Notifier>> {
    match cfg.kind {
        NotifyKind::Log => Ok(Arc::new(LogNotifier)),
        NotifyKind::Jsonl => Ok(Arc::new(JsonlFileNotifier::new(&cfg.path))),
        NotifyKind::Webhook => {
            let url = cfg
                .webhook_url
                .as_deref()
                .ok_or_else(|| anyhow!("notify.webhook_url is required for the webhook notifier"))?;
            Ok(Arc::new(WebhookNotifier::new(
                url,
                &cfg.headers,
                Duration::from_secs(cfg.timeout_secs),
            )?))
        }
    }
}

pub async fn build_deps(cfg: &AppConfig) -> Result<PipelineDeps> {
    Ok(PipelineDeps {
        source: build_source(cfg)?,
        store: build_store(cfg).await?,
        notifier: build_notifier(&cfg.notify)?,
        retry: build_retry_strategy(&cfg.retry),
    })
}
