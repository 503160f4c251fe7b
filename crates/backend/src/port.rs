use async_trait::async_trait;
use ccf_core::connector::{Connector, ContainerSpec};
use ccf_core::environment::build_container_environment;
use ccf_core::job::{EnvironmentVariable, Job};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Everything the backend needs to run one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitRequest {
    /// The job id; echoed back as `correlation_id` in terminal events.
    pub correlation_id: String,
    pub connector_id: String,
    pub container_spec: ContainerSpec,
    /// Full container environment, injected variables first.
    pub environment: Vec<EnvironmentVariable>,
}

impl SubmitRequest {
    pub fn for_job(job: &Job, connector: &Connector, api_endpoint: Option<&str>) -> Self {
        Self {
            correlation_id: job.job_id.clone(),
            connector_id: job.connector_id.clone(),
            container_spec: connector.container_spec.clone(),
            environment: build_container_environment(job, api_endpoint),
        }
    }
}

/// Backend-side state of a submitted work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendJobState {
    /// Accepted but not yet running.
    Queued,
    Running,
    Succeeded,
    Failed { reason: Option<String> },
}

impl BackendJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// The external service that runs connector containers.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submit a work item. Returns the backend's handle for it.
    async fn submit(&self, request: &SubmitRequest) -> Result<String, BackendError>;

    /// Ask the backend to cancel a work item. Completion is reported later
    /// through a terminal event.
    async fn cancel(&self, handle: &str, reason: &str) -> Result<(), BackendError>;

    async fn describe(&self, handle: &str) -> Result<BackendJobState, BackendError>;
}
