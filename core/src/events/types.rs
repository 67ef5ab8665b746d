use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::{RunStatus, TaskState};
use crate::quality::LedgerSummary;

/// Events published during a run, serialized one per line by the events writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        pipeline: String,
        stages: Vec<Vec<String>>,
        timestamp: DateTime<Utc>,
    },
    TaskStateChanged {
        run_id: String,
        task_id: String,
        from: TaskState,
        to: TaskState,
        attempt: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    RetryScheduled {
        run_id: String,
        task_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },
    QualitySummary {
        run_id: String,
        summary: LedgerSummary,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::TaskStateChanged { run_id, .. }
            | Self::RetryScheduled { run_id, .. }
            | Self::QualitySummary { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::TaskStateChanged { timestamp, .. }
            | Self::RetryScheduled { timestamp, .. }
            | Self::QualitySummary { timestamp, .. }
            | Self::RunFinished { timestamp, .. } => *timestamp,
        }
    }

    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let ev = RunEvent::TaskStateChanged {
            run_id: "r1".into(),
            task_id: "load".into(),
            from: TaskState::Running,
            to: TaskState::RetryWait,
            attempt: 1,
            error: None,
            timestamp: Utc::now(),
        };
        let v: serde_json::Value = serde_json::from_str(&ev.to_jsonl().unwrap()).unwrap();
        assert_eq!(v["type"], "task_state_changed");
        assert_eq!(v["to"], "retry_wait");
        assert!(v.get("error").is_none());
        assert_eq!(ev.run_id(), "r1");
    }
}
