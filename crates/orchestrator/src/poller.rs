//! Completion poller: a safety net for lost terminal events.
//!
//! Periodically describes every `RUNNING` or `STOPPING` job that has a
//! backend handle and feeds terminal backend states to the
//! [`CompletionReconciler`] as synthesized terminal events.

use std::sync::Arc;

use ccf_backend::{BackendError, BackendJobState, ExecutionBackend};
use ccf_core::completion::{TerminalEvent, TerminalOutcome};
use ccf_core::error::CoreError;
use ccf_core::job::{Job, JobCursor};
use ccf_core::status::JobStatus;
use ccf_db::MetadataStore;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::completion::CompletionReconciler;
use crate::config::OrchestratorConfig;

/// Jobs described per poll.
const POLL_BATCH: i64 = 100;

pub struct CompletionPoller {
    store: Arc<dyn MetadataStore>,
    backend: Arc<dyn ExecutionBackend>,
    completion: Arc<CompletionReconciler>,
    config: Arc<OrchestratorConfig>,
}

impl CompletionPoller {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        backend: Arc<dyn ExecutionBackend>,
        completion: Arc<CompletionReconciler>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            store,
            backend,
            completion,
            config,
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.completion_poll_interval.as_secs(),
            "Completion poller started"
        );

        let mut interval = tokio::time::interval(self.config.completion_poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Completion poller stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(0) => tracing::debug!("Completion poll: no finished jobs"),
                        Ok(finished) => tracing::info!(finished, "Completion poll finished jobs"),
                        Err(e) => tracing::error!(error = %e, "Completion poll failed"),
                    }
                }
            }
        }
    }

    /// Describe every in-flight job once, a page at a time. Returns how
    /// many were finished.
    pub async fn poll_once(&self) -> Result<usize, CoreError> {
        let mut finished = 0;
        let mut cursor: Option<JobCursor> = None;

        loop {
            let batch = self
                .store
                .list_jobs_by_status(
                    &[JobStatus::Running, JobStatus::Stopping],
                    cursor.as_ref(),
                    POLL_BATCH,
                )
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(JobCursor::after(last));
            let exhausted = (batch.len() as i64) < POLL_BATCH;

            for job in batch {
                let Some(event) = self.observe(&job).await else {
                    continue;
                };
                match self.completion.handle_event(&event).await {
                    Ok(Some(_)) => finished += 1,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(job_id = %job.job_id, error = %e, "Failed to apply polled completion");
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        Ok(finished)
    }

    /// The terminal event implied by the backend's view of `job`, if any.
    async fn observe(&self, job: &Job) -> Option<TerminalEvent> {
        let handle = job.backend_job_id.as_deref()?;
        let (outcome, reason) = match self.backend.describe(handle).await {
            Ok(BackendJobState::Succeeded) => (TerminalOutcome::Succeeded, None),
            Ok(BackendJobState::Failed { reason }) => (TerminalOutcome::Failed, reason),
            Ok(BackendJobState::Queued | BackendJobState::Running) => return None,
            // Freshly submitted work items can be briefly invisible, so only
            // give up on a handle once it is older than a claim lease.
            Err(BackendError::UnknownJob(_)) if self.is_settled(job) => (
                TerminalOutcome::Failed,
                Some(format!("Execution backend has no record of '{handle}'")),
            ),
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, backend_job_id = handle, error = %e, "Failed to describe backend job");
                return None;
            }
        };

        Some(TerminalEvent {
            correlation_id: job.job_id.clone(),
            outcome,
            reason,
        })
    }

    fn is_settled(&self, job: &Job) -> bool {
        job.dispatched_at.is_some_and(|at| {
            Utc::now().signed_duration_since(at) >= self.config.claim_lease
        })
    }
}
