//! Scriptable in-process execution backend.
//!
//! Work items never run; they sit in `RUNNING` until a test (or a local
//! operator) completes them with [`MemoryBackend::complete`], which
//! publishes a terminal event on the [`CompletionInbox`]. Cancelling a
//! work item fails it with a terminal event, as a batch service does.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ccf_core::completion::{TerminalEvent, TerminalOutcome};
use ccf_events::CompletionInbox;
use tokio::sync::{watch, Mutex};

use crate::error::BackendError;
use crate::port::{BackendJobState, ExecutionBackend, SubmitRequest};

/// A failure to return from the next scripted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Transient,
    Rejected,
}

impl ScriptedFailure {
    fn into_error(self, operation: &str) -> BackendError {
        match self {
            ScriptedFailure::Transient => {
                BackendError::Transient(format!("scripted {operation} throttling"))
            }
            ScriptedFailure::Rejected => BackendError::Rejected {
                status: 400,
                body: format!("scripted {operation} rejection"),
            },
        }
    }
}

struct MemoryJob {
    correlation_id: String,
    state: BackendJobState,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    jobs: HashMap<String, MemoryJob>,
    submit_failures: VecDeque<ScriptedFailure>,
    cancel_failures: VecDeque<ScriptedFailure>,
    submissions: Vec<SubmitRequest>,
    cancellations: Vec<String>,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    inbox: Arc<CompletionInbox>,
    gate: watch::Sender<bool>,
    complete_on_cancel: AtomicBool,
}

impl MemoryBackend {
    pub fn new(inbox: Arc<CompletionInbox>) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Mutex::new(Inner::default()),
            inbox,
            gate,
            complete_on_cancel: AtomicBool::new(true),
        }
    }

    /// Fail the next `n` submissions with `failure`.
    pub async fn fail_next_submits(&self, n: usize, failure: ScriptedFailure) {
        let mut inner = self.inner.lock().await;
        inner.submit_failures.extend(std::iter::repeat(failure).take(n));
    }

    /// Fail the next `n` cancellations with `failure`.
    pub async fn fail_next_cancels(&self, n: usize, failure: ScriptedFailure) {
        let mut inner = self.inner.lock().await;
        inner.cancel_failures.extend(std::iter::repeat(failure).take(n));
    }

    /// Block submissions until [`release_submissions`](Self::release_submissions).
    pub fn hold_submissions(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_submissions(&self) {
        self.gate.send_replace(true);
    }

    /// Whether a successful cancel immediately fails the work item.
    pub fn set_complete_on_cancel(&self, enabled: bool) {
        self.complete_on_cancel.store(enabled, Ordering::SeqCst);
    }

    /// Every request accepted so far, in order.
    pub async fn submissions(&self) -> Vec<SubmitRequest> {
        self.inner.lock().await.submissions.clone()
    }

    /// Every handle a successful cancel was issued for, in order.
    pub async fn cancellations(&self) -> Vec<String> {
        self.inner.lock().await.cancellations.clone()
    }

    /// Finish a work item and publish its terminal event.
    ///
    /// Returns `false` if the handle is unknown or already terminal.
    pub async fn complete(
        &self,
        handle: &str,
        outcome: TerminalOutcome,
        reason: Option<String>,
    ) -> bool {
        let event = {
            let mut inner = self.inner.lock().await;
            match finish(&mut inner, handle, outcome, reason) {
                Some(event) => event,
                None => return false,
            }
        };
        self.inbox.publish(event);
        true
    }

    /// Change a work item's state without publishing anything, as if the
    /// terminal event were lost.
    pub async fn set_state_silently(&self, handle: &str, state: BackendJobState) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(handle) {
            Some(job) => {
                job.state = state;
                true
            }
            None => false,
        }
    }
}

fn finish(
    inner: &mut Inner,
    handle: &str,
    outcome: TerminalOutcome,
    reason: Option<String>,
) -> Option<TerminalEvent> {
    let job = inner.jobs.get_mut(handle)?;
    if job.state.is_terminal() {
        return None;
    }

    job.state = match outcome {
        TerminalOutcome::Succeeded => BackendJobState::Succeeded,
        TerminalOutcome::Failed => BackendJobState::Failed {
            reason: reason.clone(),
        },
    };
    Some(TerminalEvent {
        correlation_id: job.correlation_id.clone(),
        outcome,
        reason,
    })
}

#[async_trait]
impl ExecutionBackend for MemoryBackend {
    async fn submit(&self, request: &SubmitRequest) -> Result<String, BackendError> {
        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = gate.wait_for(|open| *open).await;

        let mut inner = self.inner.lock().await;
        if let Some(failure) = inner.submit_failures.pop_front() {
            return Err(failure.into_error("submit"));
        }

        inner.next_id += 1;
        let handle = format!("mem-{:06}", inner.next_id);
        inner.jobs.insert(
            handle.clone(),
            MemoryJob {
                correlation_id: request.correlation_id.clone(),
                state: BackendJobState::Running,
            },
        );
        inner.submissions.push(request.clone());

        tracing::debug!(job_id = %request.correlation_id, backend_job_id = %handle, "Memory backend accepted job");
        Ok(handle)
    }

    async fn cancel(&self, handle: &str, reason: &str) -> Result<(), BackendError> {
        let event = {
            let mut inner = self.inner.lock().await;
            if !inner.jobs.contains_key(handle) {
                return Err(BackendError::UnknownJob(handle.to_string()));
            }
            if let Some(failure) = inner.cancel_failures.pop_front() {
                return Err(failure.into_error("cancel"));
            }
            inner.cancellations.push(handle.to_string());

            if self.complete_on_cancel.load(Ordering::SeqCst) {
                finish(
                    &mut inner,
                    handle,
                    TerminalOutcome::Failed,
                    Some(format!("Cancelled: {reason}")),
                )
            } else {
                None
            }
        };

        if let Some(event) = event {
            self.inbox.publish(event);
        }
        Ok(())
    }

    async fn describe(&self, handle: &str) -> Result<BackendJobState, BackendError> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(handle)
            .map(|job| job.state.clone())
            .ok_or_else(|| BackendError::UnknownJob(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ccf_core::connector::{ContainerSpec, ResourceRequirements};

    use super::*;

    fn request(job_id: &str) -> SubmitRequest {
        SubmitRequest {
            correlation_id: job_id.to_string(),
            connector_id: "cc-abc".to_string(),
            container_spec: ContainerSpec {
                image_uri: "img".to_string(),
                execution_role: "role".to_string(),
                job_role: None,
                resource_requirements: ResourceRequirements::default(),
                timeout_secs: 0,
            },
            environment: Vec::new(),
        }
    }

    fn backend() -> (MemoryBackend, Arc<CompletionInbox>) {
        let inbox = Arc::new(CompletionInbox::default());
        (MemoryBackend::new(Arc::clone(&inbox)), inbox)
    }

    #[tokio::test]
    async fn submit_then_complete_publishes_event() {
        let (backend, inbox) = backend();
        let mut rx = inbox.subscribe();

        let handle = backend.submit(&request("ccj-1")).await.unwrap();
        assert_eq!(backend.describe(&handle).await.unwrap(), BackendJobState::Running);

        assert!(backend.complete(&handle, TerminalOutcome::Succeeded, None).await);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.correlation_id, "ccj-1");
        assert_eq!(event.outcome, TerminalOutcome::Succeeded);

        // Already terminal.
        assert!(!backend.complete(&handle, TerminalOutcome::Failed, None).await);
    }

    #[tokio::test]
    async fn scripted_submit_failures_are_consumed_in_order() {
        let (backend, _) = backend();
        backend.fail_next_submits(1, ScriptedFailure::Transient).await;
        backend.fail_next_submits(1, ScriptedFailure::Rejected).await;

        let first = backend.submit(&request("ccj-1")).await.unwrap_err();
        assert!(first.is_transient());
        assert_matches!(
            backend.submit(&request("ccj-1")).await,
            Err(BackendError::Rejected { .. })
        );
        assert!(backend.submit(&request("ccj-1")).await.is_ok());
        assert_eq!(backend.submissions().await.len(), 1);
    }

    #[tokio::test]
    async fn cancel_fails_the_work_item() {
        let (backend, inbox) = backend();
        let mut rx = inbox.subscribe();
        let handle = backend.submit(&request("ccj-1")).await.unwrap();

        backend.cancel(&handle, "user request").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.outcome, TerminalOutcome::Failed);
        assert_eq!(backend.cancellations().await, vec![handle]);
    }

    #[tokio::test]
    async fn cancel_unknown_handle_errors() {
        let (backend, _) = backend();
        assert_matches!(
            backend.cancel("mem-999", "x").await,
            Err(BackendError::UnknownJob(_))
        );
    }

    #[tokio::test]
    async fn held_submission_waits_for_release() {
        let (backend, _) = backend();
        let backend = Arc::new(backend);
        backend.hold_submissions();

        let task = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.submit(&request("ccj-1")).await })
        };
        tokio::task::yield_now().await;
        assert!(backend.submissions().await.is_empty());

        backend.release_submissions();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(backend.submissions().await.len(), 1);
    }
}
