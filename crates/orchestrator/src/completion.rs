//! Completion Reconciler: absorbs terminal events from the execution
//! backend into final job state.

use std::sync::Arc;

use ccf_core::completion::{resolve_terminal_status, TerminalEvent};
use ccf_core::error::CoreError;
use ccf_core::job::Job;
use ccf_core::retry::RetryPolicy;
use ccf_core::status::JobStatus;
use ccf_db::MetadataStore;
use ccf_events::next_event;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::finalize::Finalizer;

/// Recorded when the backend reports a failure without a reason.
const UNSPECIFIED_FAILURE: &str = "Execution backend reported failure";

pub struct CompletionReconciler {
    finalizer: Finalizer,
    /// The inbox never redelivers, so transient failures are retried here.
    redelivery: RetryPolicy,
}

impl CompletionReconciler {
    pub fn new(store: Arc<dyn MetadataStore>, config: &OrchestratorConfig) -> Self {
        Self {
            finalizer: Finalizer::new(store, config.store_retry.clone(), config.job_retention),
            redelivery: config.dispatch_retry.clone(),
        }
    }

    /// Apply one terminal event.
    ///
    /// Returns the stored terminal job, or `None` when the event changed
    /// nothing: the job is unknown, or it is already terminal (redelivery).
    /// Any non-terminal job accepts the event, whatever its current status.
    pub async fn handle_event(&self, event: &TerminalEvent) -> Result<Option<Job>, CoreError> {
        let applied = self
            .finalizer
            .finish(&event.correlation_id, |job| {
                if job.is_terminal() {
                    return None;
                }
                let status = resolve_terminal_status(job.status, event.outcome);
                let reason = (status == JobStatus::Failed).then(|| {
                    event
                        .reason
                        .clone()
                        .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string())
                });
                Some((status, reason))
            })
            .await?;

        if applied.is_none() {
            tracing::debug!(
                job_id = %event.correlation_id,
                outcome = ?event.outcome,
                "Terminal event ignored, job unknown or already finished",
            );
        }
        Ok(applied)
    }

    /// Consume terminal events until `cancel` fires.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<TerminalEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Completion reconciler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Completion reconciler shutting down");
                    break;
                }
                event = next_event(&mut events) => {
                    let Some(event) = event else {
                        tracing::warn!("Completion inbox closed, completion reconciler stopping");
                        break;
                    };
                    if let Err(e) = self.apply(&event).await {
                        tracing::error!(
                            job_id = %event.correlation_id,
                            error = %e,
                            "Failed to apply terminal event, leaving it to the poller",
                        );
                    }
                }
            }
        }
    }

    /// [`Self::handle_event`], retrying transient store errors with backoff.
    async fn apply(&self, event: &TerminalEvent) -> Result<Option<Job>, CoreError> {
        let mut attempt = 1;
        loop {
            match self.handle_event(event).await {
                Err(CoreError::TransientStore(e)) if self.redelivery.should_retry(attempt) => {
                    let delay = self.redelivery.delay_for_attempt(attempt);
                    tracing::warn!(
                        job_id = %event.correlation_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Terminal event hit a transient store error, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
