use batchflow_core::{CliError, RunCoordinator};

/// Dry run: read and validate the source, print the ledger as JSON.
///
/// Exits 0 even when records are rejected; rejections are data, not errors.
pub async fn handle_validate(coordinator: &RunCoordinator) -> Result<i32, CliError> {
    let summary = coordinator
        .dry_run()
        .await
        .map_err(|e| CliError::Command(e.to_string()))?;

    let body = serde_json::to_string_pretty(&summary)
        .map_err(|e| CliError::Command(format!("failed to encode ledger: {e}")))?;
    println!("{body}");

    tracing::info!(
        accepted = summary.accepted,
        transformed = summary.transformed,
        rejected = summary.rejected,
        "validation finished"
    );
    Ok(0)
}
