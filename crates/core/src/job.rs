//! Connector job entity and its lifecycle operations.
//!
//! Every method here returns a new [`Job`] value instead of mutating in
//! place; callers persist the result with a conditional write against the
//! version they read.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids;
use crate::status::JobStatus;
use crate::types::{Timestamp, Version};

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 50;

/// One name/value pair of the container environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

impl EnvironmentVariable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One execution attempt of a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub connector_id: String,
    pub status: JobStatus,
    /// Caller-supplied environment, in submission order.
    pub environment: Vec<EnvironmentVariable>,
    /// Handle returned by the execution backend once submitted.
    pub backend_job_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    /// Set by the dispatch reconciler before it talks to the backend.
    pub dispatch_claimed_at: Option<Timestamp>,
    pub dispatched_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// When a terminal job becomes eligible for deletion.
    pub expires_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    pub version: Version,
}

impl Job {
    /// Build an unsaved `STARTED` job with a fresh id.
    pub fn new(
        connector_id: impl Into<String>,
        environment: Vec<EnvironmentVariable>,
        now: Timestamp,
    ) -> Self {
        Self {
            job_id: ids::new_job_id(),
            connector_id: connector_id.into(),
            status: JobStatus::Started,
            environment,
            backend_job_id: None,
            failure_reason: None,
            created_at: now,
            dispatch_claimed_at: None,
            dispatched_at: None,
            completed_at: None,
            expires_at: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&self, next: JobStatus, now: Timestamp) -> Result<Job, CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "Job '{}' cannot move from {} to {next}",
                self.job_id, self.status
            )));
        }

        let mut job = self.clone();
        job.status = next;
        job.updated_at = now;
        Ok(job)
    }

    /// Whether a dispatch claim younger than `lease` is held on this job.
    pub fn has_live_claim(&self, now: Timestamp, lease: Duration) -> bool {
        self.dispatch_claimed_at
            .is_some_and(|claimed| now.signed_duration_since(claimed) < lease)
    }

    /// Record a dispatch claim. Status is unchanged.
    pub fn claim(&self, now: Timestamp) -> Job {
        let mut job = self.clone();
        job.dispatch_claimed_at = Some(now);
        job.updated_at = now;
        job
    }

    /// `STARTED -> RUNNING` with the backend handle.
    pub fn mark_running(&self, backend_job_id: &str, now: Timestamp) -> Result<Job, CoreError> {
        let mut job = self.transition(JobStatus::Running, now)?;
        job.backend_job_id = Some(backend_job_id.to_string());
        job.dispatched_at = Some(now);
        Ok(job)
    }

    /// Attach a backend handle without changing status.
    ///
    /// Used when a submission finishes after the job already moved to
    /// `STOPPING`, so the stop path knows what to cancel.
    pub fn attach_handle(&self, backend_job_id: &str, now: Timestamp) -> Job {
        let mut job = self.clone();
        job.backend_job_id = Some(backend_job_id.to_string());
        job.dispatched_at = Some(now);
        job.updated_at = now;
        job
    }

    /// Move to a terminal status, stamping `completed_at` and `expires_at`.
    pub fn finish(
        &self,
        status: JobStatus,
        failure_reason: Option<String>,
        now: Timestamp,
        retention: Duration,
    ) -> Result<Job, CoreError> {
        if !status.is_terminal() {
            return Err(CoreError::Internal(format!(
                "finish called with non-terminal status {status}"
            )));
        }

        let mut job = self.transition(status, now)?;
        if failure_reason.is_some() {
            job.failure_reason = failure_reason;
        }
        job.completed_at = Some(now);
        job.expires_at = Some(now + retention);
        Ok(job)
    }
}

/// Keyset position in a scan ordered by `(created_at, job_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCursor {
    pub created_at: Timestamp,
    pub job_id: String,
}

impl JobCursor {
    /// The position just past `job`.
    pub fn after(job: &Job) -> Self {
        Self {
            created_at: job.created_at,
            job_id: job.job_id.clone(),
        }
    }
}

/// Filter and page for job listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    /// Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Defaults to 0.
    pub offset: Option<i64>,
}

impl JobQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
