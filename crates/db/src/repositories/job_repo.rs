//! Repository for the `connector_jobs` table.
//!
//! Jobs are keyed by `(connector_id, job_id)`; `job_id` alone is unique
//! too (`uq_connector_jobs_job_id`) so completion events can find a job
//! without its connector.

use ccf_core::job::{Job, JobCursor, JobQuery};
use ccf_core::status::{JobStatus, StatusId};
use ccf_core::types::{Timestamp, Version};
use sqlx::types::Json;
use sqlx::PgExecutor;

use crate::models::JobRow;

/// Column list for `connector_jobs` queries.
const COLUMNS: &str = "\
    connector_id, job_id, status_id, environment, backend_job_id, failure_reason, \
    created_at, dispatch_claimed_at, dispatched_at, completed_at, expires_at, \
    updated_at, version";

/// Terminal statuses: succeeded, failed, stopped.
const TERMINAL_STATUSES: [StatusId; 3] = [
    JobStatus::Succeeded as StatusId,
    JobStatus::Failed as StatusId,
    JobStatus::Stopped as StatusId,
];

/// Provides CRUD and conditional writes for connector jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job at version 1.
    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, job: &Job) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO connector_jobs \
                (connector_id, job_id, status_id, environment, backend_job_id, failure_reason, \
                 created_at, dispatch_claimed_at, dispatched_at, completed_at, expires_at, \
                 updated_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(&job.connector_id)
            .bind(&job.job_id)
            .bind(job.status.id())
            .bind(Json(&job.environment))
            .bind(&job.backend_job_id)
            .bind(&job.failure_reason)
            .bind(job.created_at)
            .bind(job.dispatch_claimed_at)
            .bind(job.dispatched_at)
            .bind(job.completed_at)
            .bind(job.expires_at)
            .bind(job.updated_at)
            .fetch_one(executor)
            .await
    }

    pub async fn find<'e, E: PgExecutor<'e>>(
        executor: E,
        connector_id: &str,
        job_id: &str,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM connector_jobs WHERE connector_id = $1 AND job_id = $2");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(connector_id)
            .bind(job_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_job_id<'e, E: PgExecutor<'e>>(
        executor: E,
        job_id: &str,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM connector_jobs WHERE job_id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .fetch_optional(executor)
            .await
    }

    /// List a connector's jobs, newest first, with optional status filter.
    pub async fn list_for_connector<'e, E: PgExecutor<'e>>(
        executor: E,
        connector_id: &str,
        params: &JobQuery,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM connector_jobs \
             WHERE connector_id = $1 AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC, job_id DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(connector_id)
            .bind(params.status.map(JobStatus::id))
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(executor)
            .await
    }

    /// Jobs in any of `statuses`, oldest first, keyset-paged on
    /// `(created_at, job_id)`.
    pub async fn list_by_status<'e, E: PgExecutor<'e>>(
        executor: E,
        statuses: &[StatusId],
        after: Option<&JobCursor>,
        limit: i64,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM connector_jobs \
             WHERE status_id = ANY($1) \
               AND ($2::timestamptz IS NULL OR (created_at, job_id) > ($2, $3)) \
             ORDER BY created_at ASC, job_id \
             LIMIT $4"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(statuses)
            .bind(after.map(|c| c.created_at))
            .bind(after.map(|c| c.job_id.as_str()))
            .bind(limit)
            .fetch_all(executor)
            .await
    }

    /// Overwrite every mutable column if the stored version matches.
    pub async fn update_if_version<'e, E: PgExecutor<'e>>(
        executor: E,
        job: &Job,
        expected_version: Version,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE connector_jobs SET \
                status_id = $4, backend_job_id = $5, failure_reason = $6, \
                dispatch_claimed_at = $7, dispatched_at = $8, completed_at = $9, \
                expires_at = $10, updated_at = $11, version = version + 1 \
             WHERE connector_id = $1 AND job_id = $2 AND version = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(&job.connector_id)
            .bind(&job.job_id)
            .bind(expected_version)
            .bind(job.status.id())
            .bind(&job.backend_job_id)
            .bind(&job.failure_reason)
            .bind(job.dispatch_claimed_at)
            .bind(job.dispatched_at)
            .bind(job.completed_at)
            .bind(job.expires_at)
            .bind(job.updated_at)
            .fetch_optional(executor)
            .await
    }

    /// Delete every job of a connector. Returns rows affected.
    pub async fn delete_for_connector<'e, E: PgExecutor<'e>>(
        executor: E,
        connector_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM connector_jobs WHERE connector_id = $1")
            .bind(connector_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete terminal jobs whose `expires_at` has passed.
    pub async fn delete_expired<'e, E: PgExecutor<'e>>(
        executor: E,
        now: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM connector_jobs \
             WHERE status_id = ANY($1) AND expires_at IS NOT NULL AND expires_at <= $2",
        )
        .bind(&TERMINAL_STATUSES[..])
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
