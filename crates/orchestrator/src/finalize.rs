//! The single path by which a job reaches a terminal state.

use std::sync::Arc;

use ccf_core::error::CoreError;
use ccf_core::job::Job;
use ccf_core::retry::RetryPolicy;
use ccf_core::status::JobStatus;
use ccf_db::MetadataStore;
use chrono::Utc;

use crate::backoff::pause_after_conflict;

/// Writes terminal job states and releases connectors.
///
/// Used by dispatch failure, stop-before-dispatch, cancellation failure and
/// the completion reconciler, so all of them share the same retry and
/// idempotency behaviour.
#[derive(Clone)]
pub(crate) struct Finalizer {
    store: Arc<dyn MetadataStore>,
    retry: RetryPolicy,
    retention: chrono::Duration,
}

impl Finalizer {
    pub(crate) fn new(
        store: Arc<dyn MetadataStore>,
        retry: RetryPolicy,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            store,
            retry,
            retention,
        }
    }

    /// Finish `job_id` with whatever `decide` returns for its current image.
    ///
    /// `decide` is re-evaluated against a fresh read on every attempt;
    /// returning `None` leaves the job untouched. Returns the stored
    /// terminal job, or `None` when nothing was written (unknown job or
    /// `decide` declined).
    pub(crate) async fn finish<F>(
        &self,
        job_id: &str,
        decide: F,
    ) -> Result<Option<Job>, CoreError>
    where
        F: Fn(&Job) -> Option<(JobStatus, Option<String>)>,
    {
        for attempt in 1..=self.retry.max_attempts.max(1) {
            let Some(current) = self.store.find_job(job_id).await? else {
                return Ok(None);
            };
            let Some((status, reason)) = decide(&current) else {
                return Ok(None);
            };

            let finished = current.finish(status, reason, Utc::now(), self.retention)?;
            match self.store.complete_job(&finished, current.version).await {
                Ok((stored, released)) => {
                    tracing::info!(
                        job_id,
                        connector_id = %stored.connector_id,
                        status = %stored.status,
                        connector_released = released.is_some(),
                        "Job finished",
                    );
                    return Ok(Some(stored));
                }
                Err(e) if e.is_version_conflict() => {
                    tracing::debug!(job_id, attempt, "Job changed while finishing, re-reading");
                    pause_after_conflict(&self.retry, attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::TransientStore(format!(
            "Job '{job_id}' kept changing while being finished"
        )))
    }
}
