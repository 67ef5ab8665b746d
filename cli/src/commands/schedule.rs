use std::time::Duration;

use batchflow_core::{CliError, RunCoordinator, Trigger};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::cli::ScheduleArgs;
use super::run::print_outcome;

/// Start a run every `every_secs` until cancelled or `max_runs` is reached.
///
/// Runs never overlap: a tick that arrives while a run is in progress is
/// skipped. Returns the exit code of the last run.
pub async fn handle_schedule(
    args: ScheduleArgs,
    coordinator: &RunCoordinator,
    mut cancel: watch::Receiver<bool>,
) -> Result<i32, CliError> {
    let mut ticker = tokio::time::interval(Duration::from_secs(args.every_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut runs = 0u32;
    let mut last_exit = 0;
    let mut cancel_open = true;

    loop {
        if *cancel.borrow() || args.max_runs.is_some_and(|max| runs >= max) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = cancel.changed(), if cancel_open => {
                if changed.is_err() {
                    cancel_open = false;
                }
                continue;
            }
        }
        if *cancel.borrow() {
            break;
        }

        runs += 1;
        tracing::info!(run = runs, every_secs = args.every_secs, "scheduled run starting");
        let outcome = coordinator
            .start_run(Trigger::Scheduled, cancel.clone())
            .await?;
        print_outcome(&outcome, args.json)?;
        last_exit = outcome.exit_code();

        if outcome.report.status.is_cancelled() {
            break;
        }
    }

    tracing::info!(runs, "scheduler stopped");
    Ok(last_exit)
}
