use clap::Parser;
mod commands;
use batchflow_core::config::{AppConfig, LoggingConfig};
use batchflow_core::error::{self, CliError, CoordinatorError, StorageError};
use batchflow_core::events::start_events_out;
use batchflow_core::RunCoordinator;
use commands::cli;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let cfg = load_config(&args)?;
    init_tracing(&cfg.logging).map_err(error::CliError::Config)?;

    let deps = batchflow_plugins::factory::build_deps(&cfg)
        .await
        .map_err(classify_build_error)?;
    let coordinator = RunCoordinator::new(cfg.clone(), deps)?;

    let events_out = start_events_out(&cfg.events_out)
        .await
        .map_err(error::CliError::Command)?;
    let forwarder = events_out
        .as_ref()
        .map(|out| out.attach(coordinator.events()));

    let cancel = spawn_ctrl_c_watch();
    let result = dispatch(args.command, &coordinator, cancel).await;

    // Dropping the coordinator closes the event bus so the forwarder drains.
    drop(coordinator);
    if let Some(handle) = forwarder {
        let _ = handle.await;
    }
    if let Some(out) = events_out {
        let dropped = out.dropped_count();
        if dropped > 0 {
            tracing::warn!(dropped, "events output dropped lines");
        }
        out.finish().await;
    }

    result
}

async fn dispatch(
    cmd: cli::Commands,
    coordinator: &RunCoordinator,
    cancel: watch::Receiver<bool>,
) -> Result<i32, error::CliError> {
    match cmd {
        cli::Commands::Run(run_args) => {
            commands::run::handle_run(run_args, coordinator, cancel).await
        }
        cli::Commands::Validate => commands::validate::handle_validate(coordinator).await,
        cli::Commands::Schedule(schedule_args) => {
            commands::schedule::handle_schedule(schedule_args, coordinator, cancel).await
        }
    }
}

fn load_config(args: &cli::Args) -> Result<AppConfig, error::CliError> {
    let mut cfg = match &args.config {
        Some(path) => batchflow_core::config::load_from_path(path),
        None => batchflow_core::config::load_default(),
    }
    .map_err(|e| error::CliError::Config(format!("{e:#}")))?;

    if let Some(source) = &args.source {
        cfg.source.path = Some(source.clone());
    }
    if let Some(url) = &args.database_url {
        cfg.warehouse.url = url.clone();
    }
    Ok(cfg)
}

/// Storage that cannot be opened is an I/O failure; everything else the
/// factory rejects is configuration.
fn classify_build_error(e: anyhow::Error) -> error::CliError {
    if e.downcast_ref::<StorageError>().is_some() {
        error::CliError::Command(format!("{e:#}"))
    } else {
        error::CliError::Config(format!("{e:#}"))
    }
}

/// First Ctrl-C requests cancellation; in-flight tasks finish, pending ones
/// are skipped.
fn spawn_ctrl_c_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            let _ = tx.send(true);
            // Keep the sender alive so receivers see the flag, not a closed channel.
            std::future::pending::<()>().await;
        }
    });
    rx
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    // 0: success
    // 11: config error
    // 12: invalid task graph
    // 20: I/O error
    // 30/31: run failed/cancelled (returned as a normal exit code, not as an error)
    // 32: another run is active
    // 50: internal/uncategorized
    match e {
        CliError::Config(_) => 11,
        CliError::Coordinator(ce) => match ce {
            CoordinatorError::Config(_) => 11,
            CoordinatorError::Graph(_) => 12,
            CoordinatorError::RunInProgress(_) => 32,
            CoordinatorError::Engine(_) => 50,
        },
        CliError::Io(_) => 20,
        CliError::Command(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("batchflow"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("batchflow.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchflow_core::ExecutorError;
    use pretty_assertions::assert_eq;

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(exit_code_for_error(&CliError::Config("x".into())), 11);
        assert_eq!(
            exit_code_for_error(&CliError::Coordinator(CoordinatorError::Graph(
                ExecutorError::EmptyGraph
            ))),
            12
        );
        assert_eq!(
            exit_code_for_error(&CliError::Coordinator(CoordinatorError::RunInProgress(
                "r1".into()
            ))),
            32
        );
        assert_eq!(exit_code_for_error(&CliError::Command("x".into())), 20);
        assert_eq!(
            exit_code_for_error(&CliError::Anyhow(anyhow::anyhow!("boom"))),
            50
        );
    }

    #[test]
    fn storage_failures_are_io_and_the_rest_config() {
        let storage = anyhow::Error::new(StorageError::Unavailable("db gone".into()));
        assert_eq!(exit_code_for_error(&classify_build_error(storage)), 20);

        let missing = anyhow::anyhow!("source.path is not configured");
        assert_eq!(exit_code_for_error(&classify_build_error(missing)), 11);
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let args = cli::Args::parse_from([
            "batchflow",
            "--config",
            "/nonexistent/batchflow.toml",
            "run",
        ]);
        assert!(matches!(load_config(&args), Err(CliError::Config(_))));
    }

    #[test]
    fn cli_overrides_replace_config_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batchflow.toml");
        std::fs::write(
            &path,
            "pipeline_name = \"nightly\"\n[source]\npath = \"from-file.csv\"\n",
        )
        .unwrap();

        let args = cli::Args::parse_from([
            "batchflow",
            "--config",
            path.to_str().unwrap(),
            "--source",
            "override.jsonl",
            "--database-url",
            "memory",
            "validate",
        ]);
        let cfg = load_config(&args).unwrap();

        assert_eq!(cfg.pipeline_name, "nightly");
        assert_eq!(cfg.source.path.as_deref(), Some("override.jsonl"));
        assert_eq!(cfg.warehouse.url, "memory");
    }
}
