use crate::agents::{AgentError, RunError, RunStatus};
use std::time::Duration;
use thiserror::Error;

/// Why a run loop stopped without a usable result
#[derive(Debug, Error)]
pub enum RunLoopError {
    /// Transport or decoding failure talking to the service
    #[error("Agent service error: {0}")]
    Service(#[from] AgentError),

    /// The run reached the `failed` status
    #[error("Run {run_id} failed{}", .error.as_ref().map(|e| format!(": {}", e)).unwrap_or_default())]
    RunFailed {
        run_id: String,
        error: Option<RunError>,
    },

    /// The service reported a status change that cannot happen
    #[error("Run {run_id} moved from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    /// The run is waiting on an action this driver cannot answer
    #[error("Run {run_id} requires '{kind}', which this driver cannot answer")]
    UnsupportedAction { run_id: String, kind: String },

    #[error("Gave up after {polls} polls with run still {status}")]
    PollLimitExceeded { polls: u32, status: RunStatus },

    #[error("Run did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    /// The approval policy could not produce a decision
    #[error("Approval failed: {0:#}")]
    Approval(anyhow::Error),
}

impl RunLoopError {
    /// The run itself ended badly, as opposed to the loop failing around it
    pub fn is_run_failure(&self) -> bool {
        matches!(self, Self::RunFailed { .. })
    }
}
