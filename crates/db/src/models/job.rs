use ccf_core::job::{EnvironmentVariable, Job};
use ccf_core::status::{JobStatus, StatusId};
use ccf_core::types::{Timestamp, Version};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::error::StoreError;

/// A row from the `connector_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub connector_id: String,
    pub job_id: String,
    pub status_id: StatusId,
    pub environment: Json<Vec<EnvironmentVariable>>,
    pub backend_job_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    pub dispatch_claimed_at: Option<Timestamp>,
    pub dispatched_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    pub version: Version,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_id(row.status_id).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "job '{}' has unknown status_id {}",
                row.job_id, row.status_id
            ))
        })?;

        Ok(Job {
            job_id: row.job_id,
            connector_id: row.connector_id,
            status,
            environment: row.environment.0,
            backend_job_id: row.backend_job_id,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            dispatch_claimed_at: row.dispatch_claimed_at,
            dispatched_at: row.dispatched_at,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}
