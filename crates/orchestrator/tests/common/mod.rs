//! Shared harness for orchestrator integration tests.
//!
//! Builds an [`Orchestrator`] over a `MemoryStore` and a `MemoryBackend`
//! with fast, jitter-free backoff.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ccf_backend::MemoryBackend;
use ccf_core::change::ChangeRecord;
use ccf_core::connector::{Connector, ContainerSpec, NewConnector, ResourceRequirements};
use ccf_core::job::{Job, JobQuery};
use ccf_core::retry::RetryPolicy;
use ccf_core::status::{ConnectorStatus, JobStatus};
use ccf_db::{MemoryStore, MetadataStore};
use ccf_events::CompletionInbox;
use ccf_orchestrator::{Orchestrator, OrchestratorConfig};
use tokio::sync::broadcast;

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        dispatch_retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        },
        ..OrchestratorConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub backend: Arc<MemoryBackend>,
    pub inbox: Arc<CompletionInbox>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(MemoryStore::default());
        let inbox = Arc::new(CompletionInbox::default());
        let backend = Arc::new(MemoryBackend::new(Arc::clone(&inbox)));
        let orchestrator = Orchestrator::new(store.clone(), backend.clone(), config);
        Self {
            store,
            backend,
            inbox,
            orchestrator,
        }
    }

    pub async fn create_connector(&self, name: &str) -> Connector {
        self.orchestrator
            .registry
            .create(NewConnector {
                name: name.to_string(),
                description: None,
                container_spec: ContainerSpec {
                    image_uri: "registry.local/connectors/crm:1.0".to_string(),
                    execution_role: "role/ccf-execution".to_string(),
                    job_role: Some("role/crm-job".to_string()),
                    resource_requirements: ResourceRequirements::default(),
                    timeout_secs: 3600,
                },
            })
            .await
            .expect("connector should be created")
    }

    pub async fn job(&self, job_id: &str) -> Job {
        self.store
            .find_job(job_id)
            .await
            .unwrap()
            .expect("job should exist")
    }

    pub async fn connector(&self, connector_id: &str) -> Connector {
        self.store
            .get_connector(connector_id)
            .await
            .unwrap()
            .expect("connector should exist")
    }

    /// Start a job and dispatch it, returning the `RUNNING` job.
    pub async fn running_job(&self, connector_id: &str) -> Job {
        let job = self
            .orchestrator
            .admission
            .start_job(connector_id, Vec::new())
            .await
            .unwrap();
        self.orchestrator
            .dispatch
            .dispatch(connector_id, &job.job_id)
            .await
            .unwrap();
        let job = self.job(&job.job_id).await;
        assert_eq!(job.status, JobStatus::Running);
        job
    }

    /// Poll until the job reaches `status`, failing after five seconds.
    pub async fn wait_for_status(&self, job_id: &str, status: JobStatus) -> Job {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = self.job(job_id).await;
                if job.status == status {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {job_id} never reached {status}"))
    }

    /// `IN_USE` if and only if exactly one job of the connector is active.
    pub async fn assert_exclusive(&self, connector_id: &str) {
        let connector = self.connector(connector_id).await;
        let query = JobQuery {
            limit: Some(100),
            ..Default::default()
        };
        let active: Vec<Job> = self
            .store
            .list_jobs(connector_id, &query)
            .await
            .unwrap()
            .into_iter()
            .filter(|j| j.status.is_active())
            .collect();

        assert!(active.len() <= 1, "connector {connector_id} has {} active jobs", active.len());
        match connector.status {
            ConnectorStatus::InUse => {
                assert_eq!(active.len(), 1, "IN_USE connector without an active job");
                assert_eq!(connector.active_job_id.as_deref(), Some(active[0].job_id.as_str()));
            }
            ConnectorStatus::Available => {
                assert!(active.is_empty(), "AVAILABLE connector with an active job");
                assert!(connector.active_job_id.is_none());
            }
        }
    }
}

/// Everything currently buffered on a change-feed receiver.
pub fn drain(rx: &mut broadcast::Receiver<ChangeRecord>) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();
    while let Ok(change) = rx.try_recv() {
        changes.push(change);
    }
    changes
}
