use std::path::{Path, PathBuf};

use anyhow::Context;

use super::types::AppConfig;

/// Get the default batchflow data directory: ~/.batchflow
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".batchflow"))
}

/// Load configuration from the default locations.
///
/// Priority: environment overrides, then `~/.batchflow/config.toml`, then
/// `./batchflow.toml`, then built-in defaults.
pub fn load_default() -> anyhow::Result<AppConfig> {
    let home_config = get_data_dir()?.join("config.toml");
    let local_config = Path::new("batchflow.toml");

    let mut cfg = if home_config.exists() {
        load_file(&home_config)?
    } else if local_config.exists() {
        load_file(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

/// Load configuration from an explicit file, then apply environment overrides.
pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let mut cfg = load_file(path)?;
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

fn load_file(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str::<AppConfig>(&s)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

fn apply_env_overrides(cfg: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("BATCHFLOW_SOURCE_PATH") {
        cfg.source.path = Some(v);
    }
    if let Some(v) = get("BATCHFLOW_DATABASE_URL") {
        cfg.warehouse.url = v;
    }
    if let Some(v) = get("BATCHFLOW_WEBHOOK_URL") {
        cfg.notify.webhook_url = Some(v);
    }
    if let Some(v) = get("BATCHFLOW_MAX_PARALLEL") {
        match v.trim().parse::<usize>() {
            Ok(n) if n > 0 => cfg.engine.max_parallel = n,
            _ => tracing::warn!(value = %v, "ignoring invalid BATCHFLOW_MAX_PARALLEL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NotifyKind, SourceFormat};
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn parses_partial_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
pipeline_name = "nightly"

[retry]
strategy = "linear"
base_delay_ms = 50
max_delay_ms = 500
max_attempts = 5

[validation]
retention_days = 30

[source]
path = "data/tx.jsonl"

[notify]
kind = "webhook"
webhook_url = "http://localhost:9000/hook"
"#
        )
        .unwrap();

        let cfg = load_file(file.path()).unwrap();

        assert_eq!(cfg.pipeline_name, "nightly");
        assert_eq!(cfg.retry.strategy, "linear");
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.validation.retention_days, 30);
        assert_eq!(cfg.validation.sample_limit, 50);
        assert_eq!(cfg.source.resolved_format(), SourceFormat::Jsonl);
        assert_eq!(cfg.notify.kind, NotifyKind::Webhook);
        assert_eq!(cfg.warehouse.url, "sqlite://batchflow.db");
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BATCHFLOW_DATABASE_URL", "sqlite::memory:"),
            ("BATCHFLOW_SOURCE_PATH", "  "),
            ("BATCHFLOW_MAX_PARALLEL", "3"),
        ]);
        let mut cfg = AppConfig::default();

        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.warehouse.url, "sqlite::memory:");
        assert_eq!(cfg.source.path, None);
        assert_eq!(cfg.engine.max_parallel, 3);
    }

    #[test]
    fn invalid_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retry = 3").unwrap();

        let err = load_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }
}
