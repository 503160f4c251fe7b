//! REST client for a batch execution service.
//!
//! Endpoints (relative to the configured base URL):
//!
//! ```text
//! POST /jobs               submit, returns { "job_id": "..." }
//! POST /jobs/{id}/cancel   cancel with { "reason": "..." }
//! GET  /jobs/{id}          describe, returns { "status": "...", "status_reason": "..." }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use ccf_core::job::EnvironmentVariable;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::port::{BackendJobState, ExecutionBackend, SubmitRequest};

/// HTTP client for one batch service queue.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    queue: String,
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    job_name: &'a str,
    queue: &'a str,
    image: &'a str,
    execution_role: &'a str,
    job_role: Option<&'a str>,
    vcpu: f64,
    memory_mib: u32,
    /// Omitted when the connector sets no timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt_timeout_secs: Option<u32>,
    environment: &'a [EnvironmentVariable],
    tags: SubmitTags<'a>,
}

#[derive(Debug, Serialize)]
struct SubmitTags<'a> {
    connector_id: &'a str,
    job_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    status: String,
    status_reason: Option<String>,
}

impl HttpBackend {
    /// Create a client with its own connection pool and request timeout.
    pub fn new(base_url: String, queue: String, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, queue))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: String, queue: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            queue,
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, classifying
    /// failures into transient and permanent errors.
    async fn ensure_success(
        response: reqwest::Response,
        handle: Option<&str>,
    ) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(classify_status(status, body, handle))
    }
}

fn classify_status(status: StatusCode, body: String, handle: Option<&str>) -> BackendError {
    if let (true, Some(handle)) = (status == StatusCode::NOT_FOUND, handle) {
        return BackendError::UnknownJob(handle.to_string());
    }
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        return BackendError::Transient(format!("{status}: {body}"));
    }
    BackendError::Rejected {
        status: status.as_u16(),
        body,
    }
}

fn map_status(status: &str, reason: Option<String>) -> Result<BackendJobState, BackendError> {
    match status {
        "SUBMITTED" | "PENDING" | "RUNNABLE" | "STARTING" => Ok(BackendJobState::Queued),
        "RUNNING" => Ok(BackendJobState::Running),
        "SUCCEEDED" => Ok(BackendJobState::Succeeded),
        "FAILED" => Ok(BackendJobState::Failed { reason }),
        other => Err(BackendError::Transient(format!(
            "unrecognised backend status '{other}'"
        ))),
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn submit(&self, request: &SubmitRequest) -> Result<String, BackendError> {
        let spec = &request.container_spec;
        let body = SubmitBody {
            job_name: &request.correlation_id,
            queue: &self.queue,
            image: &spec.image_uri,
            execution_role: &spec.execution_role,
            job_role: spec.job_role.as_deref(),
            vcpu: spec.resource_requirements.cpu,
            memory_mib: spec.resource_requirements.memory_mib,
            attempt_timeout_secs: (spec.timeout_secs > 0).then_some(spec.timeout_secs),
            environment: &request.environment,
            tags: SubmitTags {
                connector_id: &request.connector_id,
                job_id: &request.correlation_id,
            },
        };

        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(&body)
            .send()
            .await?;
        let response = Self::ensure_success(response, None).await?;
        let submitted: SubmitResponse = response.json().await?;

        tracing::debug!(
            job_id = %request.correlation_id,
            backend_job_id = %submitted.job_id,
            "Backend accepted submission",
        );
        Ok(submitted.job_id)
    }

    async fn cancel(&self, handle: &str, reason: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(format!("{}/jobs/{handle}/cancel", self.base_url))
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await?;
        Self::ensure_success(response, Some(handle)).await?;
        Ok(())
    }

    async fn describe(&self, handle: &str) -> Result<BackendJobState, BackendError> {
        let response = self
            .client
            .get(format!("{}/jobs/{handle}", self.base_url))
            .send()
            .await?;
        let response = Self::ensure_success(response, Some(handle)).await?;
        let described: DescribeResponse = response.json().await?;
        map_status(&described.status, described.status_reason)
    }
}
