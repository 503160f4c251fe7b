//! Dispatch Reconciler.
//!
//! Reacts to jobs entering `STARTED` (submit to the execution backend) and
//! `STOPPING` (cancel on the execution backend). Deliveries are
//! at-least-once and may run concurrently for the same job, so every action
//! starts from a fresh read and is guarded by a conditional write:
//!
//! 1. Re-read the job; anything other than `STARTED` is a no-op.
//! 2. Record a dispatch claim with a CAS. Losing the CAS, or finding a claim
//!    younger than the lease, is a no-op.
//! 3. Submit with bounded exponential backoff.
//! 4. Record the backend handle together with `RUNNING`, or finish the job
//!    `FAILED` and release the connector.

use std::sync::Arc;

use ccf_backend::{BackendError, ExecutionBackend, SubmitRequest};
use ccf_core::change::ChangeRecord;
use ccf_core::error::CoreError;
use ccf_core::job::{Job, JobCursor};
use ccf_core::status::JobStatus;
use ccf_core::types::Timestamp;
use ccf_db::MetadataStore;
use ccf_events::next_event;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backoff::{pause_after_conflict, retry_backend};
use crate::config::OrchestratorConfig;
use crate::finalize::Finalizer;

/// Jobs examined per re-scan pass.
const RESCAN_BATCH: i64 = 100;

/// Jobs acted on concurrently during a re-scan.
const RESCAN_CONCURRENCY: usize = 8;

/// Reason recorded on jobs stopped before anything ran.
const STOPPED_BEFORE_DISPATCH: &str = "Stopped before submission to the execution backend";

pub struct DispatchReconciler {
    store: Arc<dyn MetadataStore>,
    backend: Arc<dyn ExecutionBackend>,
    config: Arc<OrchestratorConfig>,
    finalizer: Finalizer,
    tasks: TaskTracker,
}

impl DispatchReconciler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        backend: Arc<dyn ExecutionBackend>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        let finalizer = Finalizer::new(
            Arc::clone(&store),
            config.store_retry.clone(),
            config.job_retention,
        );
        Self {
            store,
            backend,
            config,
            finalizer,
            tasks: TaskTracker::new(),
        }
    }

    /// Consume the change feed until `cancel` fires, handling each trigger
    /// on its own task.
    ///
    /// In-flight handlers are awaited before returning.
    pub async fn run(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<ChangeRecord>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Dispatch reconciler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dispatch reconciler shutting down");
                    break;
                }
                change = next_event(&mut changes) => {
                    let Some(change) = change else {
                        tracing::warn!("Change feed closed, dispatch reconciler stopping");
                        break;
                    };
                    if !is_trigger(&change) {
                        continue;
                    }

                    let this = Arc::clone(&self);
                    self.tasks.spawn(async move {
                        if let Err(e) = this.handle_change(&change).await {
                            tracing::error!(error = %e, "Failed to reconcile job change");
                        }
                    });
                }
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Re-scan non-terminal jobs on a fixed interval until `cancel` fires.
    ///
    /// The first pass runs immediately, which picks up anything left behind
    /// by a previous process.
    pub async fn run_rescan(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.rescan_interval.as_secs(),
            "Dispatch re-scan started"
        );

        let mut interval = tokio::time::interval(self.config.rescan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dispatch re-scan stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.rescan().await {
                        Ok(0) => tracing::debug!("Dispatch re-scan: nothing to do"),
                        Ok(picked_up) => {
                            tracing::info!(picked_up, "Dispatch re-scan picked up jobs");
                        }
                        Err(e) => tracing::error!(error = %e, "Dispatch re-scan failed"),
                    }
                }
            }
        }
    }

    /// React to one change record. Anything that is not a job entering
    /// `STARTED` or `STOPPING` is ignored.
    pub async fn handle_change(&self, change: &ChangeRecord) -> Result<(), CoreError> {
        let ChangeRecord::Job(change) = change else {
            return Ok(());
        };
        let job = &change.new_image;
        match change.entered_status() {
            Some(JobStatus::Started) => self.dispatch(&job.connector_id, &job.job_id).await,
            Some(JobStatus::Stopping) => self.stop(&job.connector_id, &job.job_id).await,
            _ => Ok(()),
        }
    }

    /// Submit a `STARTED` job to the execution backend.
    pub async fn dispatch(&self, connector_id: &str, job_id: &str) -> Result<(), CoreError> {
        let Some(job) = self.store.get_job(connector_id, job_id).await? else {
            tracing::debug!(job_id, "Job no longer exists, skipping dispatch");
            return Ok(());
        };
        if job.status != JobStatus::Started {
            tracing::debug!(job_id, status = %job.status, "Job is not STARTED, skipping dispatch");
            return Ok(());
        }

        let now = Utc::now();
        if job.has_live_claim(now, self.config.claim_lease) {
            tracing::debug!(job_id, "Job already claimed for dispatch");
            return Ok(());
        }
        let claimed = match self.store.put_job(&job.claim(now), job.version).await {
            Ok(claimed) => claimed,
            Err(e) if e.is_version_conflict() => {
                tracing::debug!(job_id, "Lost dispatch claim to another delivery");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(connector) = self.store.get_connector(connector_id).await? else {
            self.fail(job_id, format!("Connector '{connector_id}' no longer exists"))
                .await?;
            return Ok(());
        };

        let request =
            SubmitRequest::for_job(&claimed, &connector, self.config.api_endpoint.as_deref());
        let backend = &self.backend;
        let submitted = retry_backend(&self.config.dispatch_retry, "submit", job_id, || {
            backend.submit(&request)
        })
        .await;

        match submitted {
            Ok(handle) => self.record_submission(connector_id, job_id, &handle).await,
            Err((e, attempts)) => {
                tracing::warn!(job_id, connector_id, attempts, error = %e, "Job submission failed");
                self.fail(job_id, failure_reason("Submission", &e, attempts))
                    .await?;
                Ok(())
            }
        }
    }

    /// Carry out a stop request for a `STOPPING` job.
    ///
    /// With a backend handle the work item is cancelled and the terminal
    /// event finishes the job. Without one, and with no submission in
    /// flight, nothing will ever run, so the job is finished `STOPPED` here.
    pub async fn stop(&self, connector_id: &str, job_id: &str) -> Result<(), CoreError> {
        let Some(job) = self.store.get_job(connector_id, job_id).await? else {
            return Ok(());
        };
        if job.status != JobStatus::Stopping {
            tracing::debug!(job_id, status = %job.status, "Job is not STOPPING, skipping stop");
            return Ok(());
        }

        match job.backend_job_id.as_deref() {
            Some(handle) => self.cancel(&job, handle).await,
            None if job.has_live_claim(Utc::now(), self.config.claim_lease) => {
                tracing::debug!(job_id, "Submission in flight, it will cancel on completion");
                Ok(())
            }
            None => {
                let lease = self.config.claim_lease;
                self.finalizer
                    .finish(job_id, |current| {
                        let unsubmitted = current.status == JobStatus::Stopping
                            && current.backend_job_id.is_none()
                            && !current.has_live_claim(Utc::now(), lease);
                        unsubmitted
                            .then(|| (JobStatus::Stopped, Some(STOPPED_BEFORE_DISPATCH.into())))
                    })
                    .await?;
                Ok(())
            }
        }
    }

    /// One pass over non-terminal jobs that the change feed may have missed.
    ///
    /// Pages through every `STARTED` and `STOPPING` job, so jobs that need
    /// nothing never crowd out ones that do. Returns how many jobs were
    /// acted on.
    pub async fn rescan(&self) -> Result<usize, CoreError> {
        let mut picked_up = 0;
        let mut cursor: Option<JobCursor> = None;

        loop {
            let batch = self
                .store
                .list_jobs_by_status(
                    &[JobStatus::Started, JobStatus::Stopping],
                    cursor.as_ref(),
                    RESCAN_BATCH,
                )
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(JobCursor::after(last));
            let exhausted = (batch.len() as i64) < RESCAN_BATCH;

            let now = Utc::now();
            let pending: Vec<Job> = batch
                .into_iter()
                .filter(|job| self.needs_attention(job, now))
                .collect();
            picked_up += pending.len();

            futures::stream::iter(pending)
                .for_each_concurrent(RESCAN_CONCURRENCY, |job| async move {
                    let result = match job.status {
                        JobStatus::Started => self.dispatch(&job.connector_id, &job.job_id).await,
                        _ => self.stop(&job.connector_id, &job.job_id).await,
                    };
                    if let Err(e) = result {
                        tracing::error!(job_id = %job.job_id, error = %e, "Re-scan failed to reconcile job");
                    }
                })
                .await;

            if exhausted {
                break;
            }
        }

        Ok(picked_up)
    }

    // ---- private helpers ----

    fn needs_attention(&self, job: &Job, now: Timestamp) -> bool {
        let lease = self.config.claim_lease;
        match (job.status, &job.backend_job_id) {
            (JobStatus::Started, _) | (JobStatus::Stopping, None) => !job.has_live_claim(now, lease),
            // A cancel was issued at least once; re-issue it if the job has
            // sat in STOPPING for longer than a lease.
            (JobStatus::Stopping, Some(_)) => now.signed_duration_since(job.updated_at) >= lease,
            _ => false,
        }
    }

    /// Write the backend handle back to the job after a successful submit.
    async fn record_submission(
        &self,
        connector_id: &str,
        job_id: &str,
        handle: &str,
    ) -> Result<(), CoreError> {
        for attempt in 1..=self.config.store_retry.max_attempts.max(1) {
            let Some(current) = self.store.get_job(connector_id, job_id).await? else {
                tracing::warn!(job_id, backend_job_id = handle, "Job vanished after submission");
                self.cancel_orphan(job_id, handle).await;
                return Ok(());
            };

            let now = Utc::now();
            let (next, cancel_after) = match (current.status, &current.backend_job_id) {
                (JobStatus::Started, _) => (current.mark_running(handle, now)?, false),
                (JobStatus::Stopping, None) => (current.attach_handle(handle, now), true),
                (status, None) if status.is_terminal() => {
                    match self
                        .store
                        .put_job(&current.attach_handle(handle, now), current.version)
                        .await
                    {
                        Ok(_) if stopped_before_dispatch(&current) => {
                            tracing::info!(job_id, backend_job_id = handle, "Job stopped before its submission landed, cancelling");
                            self.cancel_orphan(job_id, handle).await;
                            return Ok(());
                        }
                        Ok(_) => {
                            tracing::info!(
                                job_id,
                                status = %status,
                                backend_job_id = handle,
                                "Job finished before its backend handle was recorded",
                            );
                            return Ok(());
                        }
                        Err(e) if e.is_version_conflict() => {
                            tracing::debug!(job_id, attempt, "Job changed while recording submission, re-reading");
                            pause_after_conflict(&self.config.store_retry, attempt).await;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                (_, recorded) => {
                    if recorded.as_deref() != Some(handle) {
                        tracing::warn!(
                            job_id,
                            status = %current.status,
                            backend_job_id = handle,
                            "Submission finished after job moved on",
                        );
                        self.cancel_orphan(job_id, handle).await;
                    }
                    return Ok(());
                }
            };

            match self.store.put_job(&next, current.version).await {
                Ok(stored) if cancel_after => {
                    tracing::info!(job_id, backend_job_id = handle, "Job stopped during submission, cancelling");
                    return self.cancel(&stored, handle).await;
                }
                Ok(_) => {
                    tracing::info!(job_id, connector_id, backend_job_id = handle, "Job running");
                    return Ok(());
                }
                Err(e) if e.is_version_conflict() => {
                    tracing::debug!(job_id, attempt, "Job changed while recording submission, re-reading");
                    pause_after_conflict(&self.config.store_retry, attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::TransientStore(format!(
            "Job '{job_id}' kept changing while recording backend handle '{handle}'"
        )))
    }

    /// Cancel the work item of a `STOPPING` job. Exhausted retries finish
    /// the job `FAILED`.
    async fn cancel(&self, job: &Job, handle: &str) -> Result<(), CoreError> {
        let reason = format!("Stop requested for job {}", job.job_id);
        let backend = &self.backend;
        let result = retry_backend(&self.config.dispatch_retry, "cancel", &job.job_id, || {
            backend.cancel(handle, &reason)
        })
        .await;

        match result {
            Ok(()) => {
                tracing::info!(job_id = %job.job_id, backend_job_id = handle, "Backend cancellation requested");
                Ok(())
            }
            Err((e, attempts)) => {
                tracing::warn!(job_id = %job.job_id, attempts, error = %e, "Job cancellation failed");
                self.fail(&job.job_id, failure_reason("Cancellation", &e, attempts))
                    .await?;
                Ok(())
            }
        }
    }

    /// Best-effort cancel of a work item no job is waiting for.
    async fn cancel_orphan(&self, job_id: &str, handle: &str) {
        let backend = &self.backend;
        let result = retry_backend(&self.config.dispatch_retry, "cancel", job_id, || {
            backend.cancel(handle, "Job is no longer active")
        })
        .await;
        if let Err((e, _)) = result {
            tracing::error!(job_id, backend_job_id = handle, error = %e, "Failed to cancel orphaned backend job");
        }
    }

    /// Finish any non-terminal job `FAILED` and release its connector.
    async fn fail(&self, job_id: &str, reason: String) -> Result<Option<Job>, CoreError> {
        self.finalizer
            .finish(job_id, |current| {
                (!current.is_terminal()).then(|| (JobStatus::Failed, Some(reason.clone())))
            })
            .await
    }
}

fn is_trigger(change: &ChangeRecord) -> bool {
    match change {
        ChangeRecord::Job(change) => matches!(
            change.entered_status(),
            Some(JobStatus::Started | JobStatus::Stopping)
        ),
        ChangeRecord::Connector(_) => false,
    }
}

/// Finished `STOPPED` by the orchestrator itself, so nothing on the backend
/// has reported in for it.
fn stopped_before_dispatch(job: &Job) -> bool {
    job.status == JobStatus::Stopped && job.failure_reason.as_deref() == Some(STOPPED_BEFORE_DISPATCH)
}

fn failure_reason(operation: &str, error: &BackendError, attempts: u32) -> String {
    if error.is_transient() {
        format!("{operation} failed after {attempts} attempts: {error}")
    } else {
        format!("{operation} failed: {error}")
    }
}
