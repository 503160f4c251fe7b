//! Repository for the `connectors` table.
//!
//! Every write past insert is conditional on the `version` column; a
//! `None` result means the expected version no longer matches.

use ccf_core::connector::Connector;
use ccf_core::status::ConnectorStatus;
use ccf_core::types::{Timestamp, Version};
use sqlx::types::Json;
use sqlx::PgExecutor;

use crate::models::ConnectorRow;

/// Column list for `connectors` queries.
const COLUMNS: &str = "\
    connector_id, name, description, container_spec, status_id, \
    active_job_id, version, created_at, updated_at";

/// Provides CRUD and conditional writes for connectors.
pub struct ConnectorRepo;

impl ConnectorRepo {
    /// Insert a new connector at version 1.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        connector: &Connector,
    ) -> Result<ConnectorRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO connectors \
                (connector_id, name, description, container_spec, status_id, \
                 active_job_id, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ConnectorRow>(&query)
            .bind(&connector.connector_id)
            .bind(&connector.name)
            .bind(&connector.description)
            .bind(Json(&connector.container_spec))
            .bind(connector.status.id())
            .bind(&connector.active_job_id)
            .bind(connector.created_at)
            .bind(connector.updated_at)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        connector_id: &str,
    ) -> Result<Option<ConnectorRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM connectors WHERE connector_id = $1");
        sqlx::query_as::<_, ConnectorRow>(&query)
            .bind(connector_id)
            .fetch_optional(executor)
            .await
    }

    /// Like [`find_by_id`](Self::find_by_id) but takes a row lock for the
    /// rest of the transaction.
    pub async fn find_by_id_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        connector_id: &str,
    ) -> Result<Option<ConnectorRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM connectors WHERE connector_id = $1 FOR UPDATE");
        sqlx::query_as::<_, ConnectorRow>(&query)
            .bind(connector_id)
            .fetch_optional(executor)
            .await
    }

    /// List connectors, newest first.
    pub async fn list<'e, E: PgExecutor<'e>>(
        executor: E,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConnectorRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM connectors \
             ORDER BY created_at DESC, connector_id \
             LIMIT $1 OFFSET $2"
        );
        sqlx::query_as::<_, ConnectorRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(executor)
            .await
    }

    /// Overwrite every mutable column if the stored version matches.
    pub async fn update_if_version<'e, E: PgExecutor<'e>>(
        executor: E,
        connector: &Connector,
        expected_version: Version,
    ) -> Result<Option<ConnectorRow>, sqlx::Error> {
        let query = format!(
            "UPDATE connectors SET \
                name = $3, description = $4, container_spec = $5, status_id = $6, \
                active_job_id = $7, updated_at = $8, version = version + 1 \
             WHERE connector_id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ConnectorRow>(&query)
            .bind(&connector.connector_id)
            .bind(expected_version)
            .bind(&connector.name)
            .bind(&connector.description)
            .bind(Json(&connector.container_spec))
            .bind(connector.status.id())
            .bind(&connector.active_job_id)
            .bind(connector.updated_at)
            .fetch_optional(executor)
            .await
    }

    /// `IN_USE -> AVAILABLE` if `job_id` is the job holding the connector.
    pub async fn release<'e, E: PgExecutor<'e>>(
        executor: E,
        connector_id: &str,
        job_id: &str,
        now: Timestamp,
    ) -> Result<Option<ConnectorRow>, sqlx::Error> {
        let query = format!(
            "UPDATE connectors SET \
                status_id = $4, active_job_id = NULL, updated_at = $5, version = version + 1 \
             WHERE connector_id = $1 AND active_job_id = $2 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ConnectorRow>(&query)
            .bind(connector_id)
            .bind(job_id)
            .bind(ConnectorStatus::InUse.id())
            .bind(ConnectorStatus::Available.id())
            .bind(now)
            .fetch_optional(executor)
            .await
    }

    /// Delete if the stored version matches, returning the deleted row.
    pub async fn delete_if_version<'e, E: PgExecutor<'e>>(
        executor: E,
        connector_id: &str,
        expected_version: Version,
    ) -> Result<Option<ConnectorRow>, sqlx::Error> {
        let query = format!(
            "DELETE FROM connectors WHERE connector_id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ConnectorRow>(&query)
            .bind(connector_id)
            .bind(expected_version)
            .fetch_optional(executor)
            .await
    }
}
