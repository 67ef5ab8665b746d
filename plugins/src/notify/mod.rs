//! Report delivery backends.

mod jsonl;
mod log;
mod webhook;

pub use jsonl::JsonlFileNotifier;
pub use log::LogNotifier;
pub use webhook::WebhookNotifier;

#[cfg(test)]
pub(crate) fn sample_report() -> batchflow_core::PipelineReport {
    use batchflow_core::executor::RunStatus;
    use batchflow_core::quality::LedgerSummary;
    use chrono::{TimeZone, Utc};

    let started_at = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
    batchflow_core::PipelineReport {
        run_id: "run-1".to_string(),
        pipeline: "daily-sales".to_string(),
        trigger: batchflow_core::Trigger::Manual,
        status: RunStatus::Succeeded,
        ledger: LedgerSummary {
            accepted: 3,
            transformed: 1,
            rejected: 1,
            ..LedgerSummary::default()
        },
        queries: Vec::new(),
        failed_task: None,
        started_at,
        finished_at: started_at + chrono::Duration::milliseconds(250),
    }
}
