use ccf_core::connector::{Connector, ContainerSpec};
use ccf_core::status::{ConnectorStatus, StatusId};
use ccf_core::types::{Timestamp, Version};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::error::StoreError;

/// A row from the `connectors` table.
#[derive(Debug, Clone, FromRow)]
pub struct ConnectorRow {
    pub connector_id: String,
    pub name: String,
    pub description: Option<String>,
    pub container_spec: Json<ContainerSpec>,
    pub status_id: StatusId,
    pub active_job_id: Option<String>,
    pub version: Version,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<ConnectorRow> for Connector {
    type Error = StoreError;

    fn try_from(row: ConnectorRow) -> Result<Self, Self::Error> {
        let status = ConnectorStatus::from_id(row.status_id).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "connector '{}' has unknown status_id {}",
                row.connector_id, row.status_id
            ))
        })?;

        Ok(Connector {
            connector_id: row.connector_id,
            name: row.name,
            description: row.description,
            container_spec: row.container_spec.0,
            status,
            active_job_id: row.active_job_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
