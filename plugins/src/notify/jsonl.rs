use std::path::{Path, PathBuf};

use async_trait::async_trait;
use batchflow_core::error::NotifyError;
use batchflow_core::notify::Notifier;
use batchflow_core::PipelineReport;
use tokio::io::AsyncWriteExt;

/// Appends each report as one JSON line.
#[derive(Debug, Clone)]
pub struct JsonlFileNotifier {
    path: PathBuf,
}

impl JsonlFileNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Notifier for JsonlFileNotifier {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn send(&self, report: &PipelineReport) -> Result<(), NotifyError> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(
            run_id = %report.run_id,
            path = %self.path.display(),
            "report appended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::sample_report;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn appends_one_line_per_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("runs.jsonl");
        let notifier = JsonlFileNotifier::new(&path);

        let report = sample_report();
        notifier.send(&report).await.unwrap();
        notifier.send(&report).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: PipelineReport = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, report);
    }
}
