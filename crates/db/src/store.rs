//! The metadata store port.

use async_trait::async_trait;
use ccf_core::change::ChangeRecord;
use ccf_core::connector::Connector;
use ccf_core::job::{Job, JobCursor, JobQuery};
use ccf_core::status::JobStatus;
use ccf_core::types::{Timestamp, Version};
use tokio::sync::broadcast;

use crate::error::StoreResult;

/// Durable storage for connectors and jobs with optimistic concurrency.
///
/// Every write that takes an `expected_version` fails with
/// [`StoreError::VersionConflict`](crate::StoreError::VersionConflict) when
/// the stored record no longer carries that version (or no longer exists).
/// Successful writes return the stored record with its new version and
/// publish one [`ChangeRecord`] per mutated entity.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new connector at version 1.
    async fn insert_connector(&self, connector: &Connector) -> StoreResult<Connector>;

    async fn get_connector(&self, connector_id: &str) -> StoreResult<Option<Connector>>;

    /// Connectors, newest first.
    async fn list_connectors(&self, limit: i64, offset: i64) -> StoreResult<Vec<Connector>>;

    async fn put_connector(
        &self,
        connector: &Connector,
        expected_version: Version,
    ) -> StoreResult<Connector>;

    /// Delete a connector and all of its jobs.
    async fn delete_connector(&self, connector_id: &str, expected_version: Version)
        -> StoreResult<()>;

    /// Atomically write the claimed connector and insert the new job.
    ///
    /// `connector` is the `IN_USE` image naming `job` as its active job.
    /// Fails with `VersionConflict` if the connector moved past
    /// `expected_connector_version`, and with `AlreadyExists` if the
    /// connector somehow already has an active job.
    async fn start_job(
        &self,
        connector: &Connector,
        expected_connector_version: Version,
        job: &Job,
    ) -> StoreResult<(Connector, Job)>;

    async fn get_job(&self, connector_id: &str, job_id: &str) -> StoreResult<Option<Job>>;

    /// Secondary lookup by job id alone.
    async fn find_job(&self, job_id: &str) -> StoreResult<Option<Job>>;

    /// A connector's jobs, newest first.
    async fn list_jobs(&self, connector_id: &str, query: &JobQuery) -> StoreResult<Vec<Job>>;

    /// One page of jobs across all connectors in any of `statuses`, oldest
    /// first, starting strictly after `after`.
    async fn list_jobs_by_status(
        &self,
        statuses: &[JobStatus],
        after: Option<&JobCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Job>>;

    /// Conditional write of a job change that does not finish the job.
    ///
    /// The only write a terminal job accepts is a late backend handle.
    async fn put_job(&self, job: &Job, expected_version: Version) -> StoreResult<Job>;

    /// Atomically write a terminal job and release its connector.
    ///
    /// The connector flips to `AVAILABLE` only if it is `IN_USE` on behalf
    /// of this job; otherwise it is left untouched and `None` is returned
    /// in its place.
    async fn complete_job(
        &self,
        job: &Job,
        expected_version: Version,
    ) -> StoreResult<(Job, Option<Connector>)>;

    /// Delete terminal jobs whose retention has elapsed.
    async fn purge_expired_jobs(&self, now: Timestamp) -> StoreResult<u64>;

    /// Subscribe to the change stream of this store.
    fn subscribe(&self) -> broadcast::Receiver<ChangeRecord>;
}
