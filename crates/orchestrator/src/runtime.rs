//! Wiring of the admission path and the background reconcilers.

use std::sync::Arc;
use std::time::Duration;

use ccf_backend::ExecutionBackend;
use ccf_db::MetadataStore;
use ccf_events::CompletionInbox;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::completion::CompletionReconciler;
use crate::config::OrchestratorConfig;
use crate::dispatch::DispatchReconciler;
use crate::poller::CompletionPoller;
use crate::registry::ConnectorRegistry;
use crate::retention::RetentionSweeper;

/// Every orchestrator component, built over one store and one backend.
#[derive(Clone)]
pub struct Orchestrator {
    pub admission: Arc<AdmissionController>,
    pub registry: Arc<ConnectorRegistry>,
    pub dispatch: Arc<DispatchReconciler>,
    pub completion: Arc<CompletionReconciler>,
    pub poller: Arc<CompletionPoller>,
    pub retention: Arc<RetentionSweeper>,
    store: Arc<dyn MetadataStore>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        backend: Arc<dyn ExecutionBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        let config = Arc::new(config);
        let completion = Arc::new(CompletionReconciler::new(Arc::clone(&store), &config));

        Self {
            admission: Arc::new(AdmissionController::new(
                Arc::clone(&store),
                Arc::clone(&config),
            )),
            registry: Arc::new(ConnectorRegistry::new(
                Arc::clone(&store),
                Arc::clone(&config),
            )),
            dispatch: Arc::new(DispatchReconciler::new(
                Arc::clone(&store),
                Arc::clone(&backend),
                Arc::clone(&config),
            )),
            poller: Arc::new(CompletionPoller::new(
                Arc::clone(&store),
                backend,
                Arc::clone(&completion),
                Arc::clone(&config),
            )),
            retention: Arc::new(RetentionSweeper::new(Arc::clone(&store), config)),
            completion,
            store,
        }
    }

    /// Spawn the dispatch reconciler, its re-scan, the completion
    /// reconciler, the completion poller and the retention sweeper.
    ///
    /// Subscriptions are taken before anything is spawned, so no change or
    /// terminal event published after this call returns is missed.
    pub fn spawn_reconcilers(&self, inbox: &CompletionInbox) -> ReconcilerHandles {
        let cancel = CancellationToken::new();
        let changes = self.store.subscribe();
        let events = inbox.subscribe();

        let handles = vec![
            (
                "dispatch",
                tokio::spawn(Arc::clone(&self.dispatch).run(changes, cancel.clone())),
            ),
            (
                "dispatch-rescan",
                tokio::spawn(Arc::clone(&self.dispatch).run_rescan(cancel.clone())),
            ),
            (
                "completion",
                tokio::spawn(Arc::clone(&self.completion).run(events, cancel.clone())),
            ),
            (
                "completion-poller",
                tokio::spawn(Arc::clone(&self.poller).run(cancel.clone())),
            ),
            (
                "retention",
                tokio::spawn(Arc::clone(&self.retention).run(cancel.clone())),
            ),
        ];

        tracing::info!(tasks = handles.len(), "Reconcilers spawned");
        ReconcilerHandles { cancel, handles }
    }
}

/// Running reconciler tasks and the token that stops them.
pub struct ReconcilerHandles {
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl ReconcilerHandles {
    /// Signal every task and wait up to `timeout` for each to finish.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();

        for (task, handle) in self.handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => tracing::debug!(task, "Reconciler stopped"),
                Ok(Err(e)) => tracing::error!(task, error = %e, "Reconciler task panicked"),
                Err(_) => tracing::warn!(task, "Reconciler did not stop in time"),
            }
        }
    }
}
