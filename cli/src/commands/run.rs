use batchflow_core::{CliError, RunCoordinator, RunOutcome, Trigger};
use tokio::sync::watch;

use super::cli::RunArgs;

/// Run the pipeline once and print its report. The exit code reflects the
/// run status.
pub async fn handle_run(
    args: RunArgs,
    coordinator: &RunCoordinator,
    cancel: watch::Receiver<bool>,
) -> Result<i32, CliError> {
    let outcome = coordinator.start_run(Trigger::Manual, cancel).await?;
    print_outcome(&outcome, args.json)?;
    Ok(outcome.exit_code())
}

pub(crate) fn print_outcome(outcome: &RunOutcome, json: bool) -> Result<(), CliError> {
    if json {
        let body = serde_json::to_string_pretty(&outcome.report)
            .map_err(|e| CliError::Command(format!("failed to encode report: {e}")))?;
        println!("{body}");
    } else {
        println!("{}", outcome.report.headline());
        if let Some(failed) = &outcome.report.failed_task {
            println!(
                "  failed task: {} (attempts={}): {}",
                failed.task_id, failed.attempts, failed.error
            );
        }
    }
    Ok(())
}
