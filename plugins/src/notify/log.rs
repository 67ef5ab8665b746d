use async_trait::async_trait;
use batchflow_core::error::NotifyError;
use batchflow_core::notify::Notifier;
use batchflow_core::PipelineReport;

/// Writes the report headline to the log. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, report: &PipelineReport) -> Result<(), NotifyError> {
        if report.is_success() {
            tracing::info!(run_id = %report.run_id, "{}", report.headline());
        } else {
            tracing::warn!(run_id = %report.run_id, "{}", report.headline());
        }
        Ok(())
    }
}
