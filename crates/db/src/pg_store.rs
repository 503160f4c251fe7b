//! PostgreSQL implementation of [`MetadataStore`].
//!
//! Multi-entity writes (`start_job`, `complete_job`, `delete_connector`)
//! run in one transaction. Change records are published on the in-process
//! [`ChangeFeed`] after commit; other processes sharing the database rely
//! on the dispatch re-scan instead.

use std::sync::Arc;

use async_trait::async_trait;
use ccf_core::change::{Change, ChangeRecord};
use ccf_core::connector::Connector;
use ccf_core::job::{Job, JobCursor, JobQuery};
use ccf_core::status::{JobStatus, StatusId};
use ccf_core::types::{Timestamp, Version};
use ccf_events::ChangeFeed;
use tokio::sync::broadcast;

use crate::error::{classify_unique_violation, StoreError, StoreResult};
use crate::models::{ConnectorRow, JobRow};
use crate::repositories::{ConnectorRepo, JobRepo};
use crate::store::MetadataStore;
use crate::DbPool;

pub struct PgStore {
    pool: DbPool,
    feed: Arc<ChangeFeed>,
}

impl PgStore {
    pub fn new(pool: DbPool, feed: Arc<ChangeFeed>) -> Self {
        Self { pool, feed }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn connector(row: ConnectorRow) -> StoreResult<Connector> {
    Connector::try_from(row)
}

fn job(row: JobRow) -> StoreResult<Job> {
    Job::try_from(row)
}

fn connector_conflict(connector_id: &str) -> StoreError {
    StoreError::version_conflict("connector", connector_id)
}

fn job_conflict(job_id: &str) -> StoreError {
    StoreError::version_conflict("job", job_id)
}

#[async_trait]
impl MetadataStore for PgStore {
    async fn insert_connector(&self, input: &Connector) -> StoreResult<Connector> {
        let row = ConnectorRepo::insert(&self.pool, input)
            .await
            .map_err(|e| classify_unique_violation(e, "connector", &input.connector_id))?;
        let stored = connector(row)?;

        self.feed
            .publish(ChangeRecord::Connector(Change::insert(stored.clone())));
        Ok(stored)
    }

    async fn get_connector(&self, connector_id: &str) -> StoreResult<Option<Connector>> {
        ConnectorRepo::find_by_id(&self.pool, connector_id)
            .await?
            .map(connector)
            .transpose()
    }

    async fn list_connectors(&self, limit: i64, offset: i64) -> StoreResult<Vec<Connector>> {
        ConnectorRepo::list(&self.pool, limit, offset)
            .await?
            .into_iter()
            .map(connector)
            .collect()
    }

    async fn put_connector(
        &self,
        input: &Connector,
        expected_version: Version,
    ) -> StoreResult<Connector> {
        let mut tx = self.pool.begin().await?;

        let old = ConnectorRepo::find_by_id_for_update(&mut *tx, &input.connector_id)
            .await?
            .ok_or_else(|| connector_conflict(&input.connector_id))?;
        let old = connector(old)?;

        let row = ConnectorRepo::update_if_version(&mut *tx, input, expected_version)
            .await?
            .ok_or_else(|| connector_conflict(&input.connector_id))?;
        let stored = connector(row)?;

        tx.commit().await?;

        self.feed
            .publish(ChangeRecord::Connector(Change::modify(old, stored.clone())));
        Ok(stored)
    }

    async fn delete_connector(
        &self,
        connector_id: &str,
        expected_version: Version,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let jobs = JobRepo::delete_for_connector(&mut *tx, connector_id).await?;
        let Some(row) =
            ConnectorRepo::delete_if_version(&mut *tx, connector_id, expected_version).await?
        else {
            // Dropping the transaction rolls back the job deletion.
            return Err(connector_conflict(connector_id));
        };
        let deleted = connector(row)?;

        tx.commit().await?;

        self.feed
            .publish(ChangeRecord::Connector(Change::remove(deleted)));

        tracing::debug!(connector_id, jobs_deleted = jobs, "Connector deleted");
        Ok(())
    }

    async fn start_job(
        &self,
        claimed: &Connector,
        expected_connector_version: Version,
        new_job: &Job,
    ) -> StoreResult<(Connector, Job)> {
        let mut tx = self.pool.begin().await?;

        let old = ConnectorRepo::find_by_id_for_update(&mut *tx, &claimed.connector_id)
            .await?
            .ok_or_else(|| connector_conflict(&claimed.connector_id))?;
        let old = connector(old)?;

        let row = ConnectorRepo::update_if_version(&mut *tx, claimed, expected_connector_version)
            .await?
            .ok_or_else(|| connector_conflict(&claimed.connector_id))?;
        let stored_connector = connector(row)?;

        let row = JobRepo::insert(&mut *tx, new_job)
            .await
            .map_err(|e| classify_unique_violation(e, "active job for connector", &new_job.connector_id))?;
        let stored_job = job(row)?;

        tx.commit().await?;

        self.feed.publish(ChangeRecord::Connector(Change::modify(
            old,
            stored_connector.clone(),
        )));
        self.feed
            .publish(ChangeRecord::Job(Change::insert(stored_job.clone())));
        Ok((stored_connector, stored_job))
    }

    async fn get_job(&self, connector_id: &str, job_id: &str) -> StoreResult<Option<Job>> {
        JobRepo::find(&self.pool, connector_id, job_id)
            .await?
            .map(job)
            .transpose()
    }

    async fn find_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
        JobRepo::find_by_job_id(&self.pool, job_id)
            .await?
            .map(job)
            .transpose()
    }

    async fn list_jobs(&self, connector_id: &str, query: &JobQuery) -> StoreResult<Vec<Job>> {
        JobRepo::list_for_connector(&self.pool, connector_id, query)
            .await?
            .into_iter()
            .map(job)
            .collect()
    }

    async fn list_jobs_by_status(
        &self,
        statuses: &[JobStatus],
        after: Option<&JobCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Job>> {
        let ids: Vec<StatusId> = statuses.iter().map(|s| s.id()).collect();
        JobRepo::list_by_status(&self.pool, &ids, after, limit)
            .await?
            .into_iter()
            .map(job)
            .collect()
    }

    async fn put_job(&self, input: &Job, expected_version: Version) -> StoreResult<Job> {
        let old = JobRepo::find(&self.pool, &input.connector_id, &input.job_id)
            .await?
            .map(job)
            .transpose()?
            .filter(|old| old.version == expected_version)
            .ok_or_else(|| job_conflict(&input.job_id))?;

        let row = JobRepo::update_if_version(&self.pool, input, expected_version)
            .await?
            .ok_or_else(|| job_conflict(&input.job_id))?;
        let stored = job(row)?;

        self.feed
            .publish(ChangeRecord::Job(Change::modify(old, stored.clone())));
        Ok(stored)
    }

    async fn complete_job(
        &self,
        input: &Job,
        expected_version: Version,
    ) -> StoreResult<(Job, Option<Connector>)> {
        let mut tx = self.pool.begin().await?;

        let old_job = JobRepo::find(&mut *tx, &input.connector_id, &input.job_id)
            .await?
            .map(job)
            .transpose()?
            .filter(|old| old.version == expected_version)
            .ok_or_else(|| job_conflict(&input.job_id))?;

        let row = JobRepo::update_if_version(&mut *tx, input, expected_version)
            .await?
            .ok_or_else(|| job_conflict(&input.job_id))?;
        let stored_job = job(row)?;

        let old_connector = ConnectorRepo::find_by_id_for_update(&mut *tx, &input.connector_id)
            .await?
            .map(connector)
            .transpose()?;
        let released = ConnectorRepo::release(
            &mut *tx,
            &input.connector_id,
            &input.job_id,
            input.updated_at,
        )
        .await?
        .map(connector)
        .transpose()?;

        tx.commit().await?;

        self.feed
            .publish(ChangeRecord::Job(Change::modify(old_job, stored_job.clone())));
        if let (Some(old), Some(new)) = (old_connector, released.as_ref()) {
            self.feed
                .publish(ChangeRecord::Connector(Change::modify(old, new.clone())));
        }
        Ok((stored_job, released))
    }

    async fn purge_expired_jobs(&self, now: Timestamp) -> StoreResult<u64> {
        Ok(JobRepo::delete_expired(&self.pool, now).await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeRecord> {
        self.feed.subscribe()
    }
}
