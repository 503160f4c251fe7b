//! Terminal events reported by the execution backend.

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;

/// Final outcome of a backend work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalOutcome {
    Succeeded,
    Failed,
}

/// Inbound completion notification, correlated by job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEvent {
    /// The job id the work item was tagged with at submission.
    pub correlation_id: String,
    pub outcome: TerminalOutcome,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Terminal job status for `outcome` given the job's current status.
///
/// A failure observed while the job is `STOPPING` is the cancellation
/// taking effect, so it resolves to `STOPPED`.
pub fn resolve_terminal_status(current: JobStatus, outcome: TerminalOutcome) -> JobStatus {
    match (outcome, current) {
        (TerminalOutcome::Succeeded, _) => JobStatus::Succeeded,
        (TerminalOutcome::Failed, JobStatus::Stopping) => JobStatus::Stopped,
        (TerminalOutcome::Failed, _) => JobStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_while_stopping_is_stopped() {
        assert_eq!(
            resolve_terminal_status(JobStatus::Stopping, TerminalOutcome::Failed),
            JobStatus::Stopped
        );
        assert_eq!(
            resolve_terminal_status(JobStatus::Running, TerminalOutcome::Failed),
            JobStatus::Failed
        );
    }

    #[test]
    fn success_is_success_regardless_of_stop_request() {
        for current in JobStatus::ACTIVE {
            assert_eq!(
                resolve_terminal_status(current, TerminalOutcome::Succeeded),
                JobStatus::Succeeded
            );
        }
    }

    #[test]
    fn event_deserializes_without_reason() {
        let event: TerminalEvent = serde_json::from_value(serde_json::json!({
            "correlation_id": "ccj-0123456789ab",
            "outcome": "FAILED",
        }))
        .unwrap();
        assert_eq!(event.outcome, TerminalOutcome::Failed);
        assert!(event.reason.is_none());
    }
}
