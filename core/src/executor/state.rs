//! Per-task state machine.
//!
//! ```text
//! pending ──▶ ready ──▶ running ──▶ succeeded
//!    │                   │  ▲  └───▶ failed
//!    │                   ▼  │
//!    │                 retry_wait
//!    ▼
//!  skipped   (also from ready / retry_wait on cancellation)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    RetryWait,
    Skipped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RetryWait => "retry_wait",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Whether a downstream task may start once its upstream is in this state.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    pub fn can_transition_to(&self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Pending, Ready)
                | (Ready, Running)
                | (Running, Succeeded)
                | (Running, RetryWait)
                | (Running, Failed)
                | (RetryWait, Running)
                | (Pending, Skipped)
                // cancellation stops anything not yet running
                | (Ready, Skipped)
                | (RetryWait, Skipped)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task never ran (or stopped being retried).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    UpstreamFailed { task_id: String },
    Cancelled,
    /// The run loop ended with the task still waiting.
    Stalled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Ready));
        assert!(TaskState::Ready.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::RetryWait));
        assert!(TaskState::RetryWait.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Failed));
        assert!(TaskState::Pending.can_transition_to(TaskState::Skipped));
    }

    #[test]
    fn invalid_transitions() {
        assert!(!TaskState::Pending.can_transition_to(TaskState::Running));
        assert!(!TaskState::Succeeded.can_transition_to(TaskState::Running));
        assert!(!TaskState::Failed.can_transition_to(TaskState::RetryWait));
        assert!(!TaskState::Running.can_transition_to(TaskState::Skipped));
        assert!(!TaskState::RetryWait.can_transition_to(TaskState::Failed));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(!TaskState::RetryWait.is_terminal());
    }
}
