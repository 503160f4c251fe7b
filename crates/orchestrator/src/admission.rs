//! Admission Controller: the synchronous gate in front of every job.
//!
//! StartJob and StopJob perform their state transition inside the request.
//! Mutual exclusion rests entirely on the connector's version: two
//! concurrent starts both read the connector `AVAILABLE`, only one
//! conditional write succeeds, and the loser re-reads `IN_USE` and is
//! refused.

use std::sync::Arc;

use ccf_core::connector::Connector;
use ccf_core::environment::validate_caller_environment;
use ccf_core::error::CoreError;
use ccf_core::job::{EnvironmentVariable, Job, JobQuery};
use ccf_core::status::JobStatus;
use ccf_db::{MetadataStore, StoreError};
use chrono::Utc;

use crate::backoff::pause_after_conflict;
use crate::config::OrchestratorConfig;

pub struct AdmissionController {
    store: Arc<dyn MetadataStore>,
    config: Arc<OrchestratorConfig>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn MetadataStore>, config: Arc<OrchestratorConfig>) -> Self {
        Self { store, config }
    }

    /// Claim an `AVAILABLE` connector and create its job in `STARTED`.
    ///
    /// Fails with `NotFound` for an unknown connector, `Conflict` when the
    /// connector is already `IN_USE`, and `TransientStore` if the connector
    /// keeps changing underneath every attempt.
    pub async fn start_job(
        &self,
        connector_id: &str,
        environment: Vec<EnvironmentVariable>,
    ) -> Result<Job, CoreError> {
        validate_caller_environment(&environment)?;

        for attempt in 1..=self.config.store_retry.max_attempts.max(1) {
            let connector = self.connector(connector_id).await?;
            let now = Utc::now();
            let job = Job::new(connector_id, environment.clone(), now);
            let claimed = connector.acquire(&job.job_id, now)?;

            match self.store.start_job(&claimed, connector.version, &job).await {
                Ok((_, job)) => {
                    tracing::info!(
                        connector_id,
                        job_id = %job.job_id,
                        env_vars = job.environment.len(),
                        "Job admitted",
                    );
                    return Ok(job);
                }
                Err(e) if e.is_version_conflict() => {
                    tracing::debug!(connector_id, attempt, "Connector changed during start, re-reading");
                    pause_after_conflict(&self.config.store_retry, attempt).await;
                }
                Err(StoreError::AlreadyExists { .. }) => {
                    return Err(in_use(connector_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::TransientStore(format!(
            "Connector '{connector_id}' kept changing while starting a job"
        )))
    }

    /// Request a stop of a `STARTED` or `RUNNING` job.
    ///
    /// The job moves to `STOPPING`; the dispatch reconciler takes it from
    /// there. Stopping a job that is already `STOPPING` succeeds without
    /// writing anything.
    pub async fn stop_job(&self, connector_id: &str, job_id: &str) -> Result<Job, CoreError> {
        for attempt in 1..=self.config.store_retry.max_attempts.max(1) {
            let connector = self.connector(connector_id).await?;
            let job = self
                .store
                .get_job(connector_id, job_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Job", job_id))?;

            match job.status {
                JobStatus::Stopping => return Ok(job),
                status if status.is_terminal() => {
                    return Err(CoreError::Conflict(format!(
                        "Job '{job_id}' already finished with status {status}"
                    )));
                }
                _ => {}
            }
            if connector.active_job_id.as_deref() != Some(job_id) {
                return Err(CoreError::Conflict(format!(
                    "Connector '{connector_id}' is not running job '{job_id}'"
                )));
            }

            let stopping = job.transition(JobStatus::Stopping, Utc::now())?;
            match self.store.put_job(&stopping, job.version).await {
                Ok(stored) => {
                    tracing::info!(connector_id, job_id, "Job stop requested");
                    return Ok(stored);
                }
                Err(e) if e.is_version_conflict() => {
                    tracing::debug!(job_id, attempt, "Job changed during stop, re-reading");
                    pause_after_conflict(&self.config.store_retry, attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::TransientStore(format!(
            "Job '{job_id}' kept changing while being stopped"
        )))
    }

    /// A connector's jobs, newest first.
    pub async fn list_jobs(
        &self,
        connector_id: &str,
        query: &JobQuery,
    ) -> Result<Vec<Job>, CoreError> {
        self.connector(connector_id).await?;
        Ok(self.store.list_jobs(connector_id, query).await?)
    }

    pub async fn get_job(&self, connector_id: &str, job_id: &str) -> Result<Job, CoreError> {
        self.store
            .get_job(connector_id, job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Job", job_id))
    }

    // ---- private helpers ----

    async fn connector(&self, connector_id: &str) -> Result<Connector, CoreError> {
        self.store
            .get_connector(connector_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Connector", connector_id))
    }
}

fn in_use(connector_id: &str) -> CoreError {
    CoreError::Conflict(format!("Connector '{connector_id}' is already running a job"))
}
