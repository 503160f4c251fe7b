//! Administrative operations on connectors.

use std::sync::Arc;

use ccf_core::connector::{Connector, ConnectorUpdate, NewConnector};
use ccf_core::error::CoreError;
use ccf_core::job::{DEFAULT_LIMIT, MAX_LIMIT};
use ccf_core::status::ConnectorStatus;
use ccf_db::MetadataStore;
use chrono::Utc;

use crate::backoff::pause_after_conflict;
use crate::config::OrchestratorConfig;

pub struct ConnectorRegistry {
    store: Arc<dyn MetadataStore>,
    config: Arc<OrchestratorConfig>,
}

impl ConnectorRegistry {
    pub fn new(store: Arc<dyn MetadataStore>, config: Arc<OrchestratorConfig>) -> Self {
        Self { store, config }
    }

    pub async fn create(&self, input: NewConnector) -> Result<Connector, CoreError> {
        input.validate()?;
        let connector = self
            .store
            .insert_connector(&Connector::new(input, Utc::now()))
            .await?;
        tracing::info!(connector_id = %connector.connector_id, name = %connector.name, "Connector created");
        Ok(connector)
    }

    pub async fn get(&self, connector_id: &str) -> Result<Connector, CoreError> {
        self.store
            .get_connector(connector_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Connector", connector_id))
    }

    /// Newest first. `limit` defaults to 50 and is capped at 100.
    pub async fn list(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Connector>, CoreError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        Ok(self.store.list_connectors(limit, offset).await?)
    }

    /// Apply a partial update, re-reading on version conflicts.
    ///
    /// Status and active job are never touched here, so an update can land
    /// while the connector is `IN_USE`.
    pub async fn update(
        &self,
        connector_id: &str,
        update: ConnectorUpdate,
    ) -> Result<Connector, CoreError> {
        if update.is_empty() {
            return Err(CoreError::Validation(
                "at least one of name, description or container_spec is required".into(),
            ));
        }
        update.validate()?;

        for attempt in 1..=self.config.store_retry.max_attempts.max(1) {
            let current = self.get(connector_id).await?;
            let next = current.apply_update(&update, Utc::now());
            match self.store.put_connector(&next, current.version).await {
                Ok(stored) => {
                    tracing::info!(connector_id, version = stored.version, "Connector updated");
                    return Ok(stored);
                }
                Err(e) if e.is_version_conflict() => {
                    tracing::debug!(connector_id, attempt, "Connector changed during update, re-reading");
                    pause_after_conflict(&self.config.store_retry, attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::TransientStore(format!(
            "Connector '{connector_id}' kept changing while being updated"
        )))
    }

    /// Delete an idle connector together with its job history.
    pub async fn delete(&self, connector_id: &str) -> Result<(), CoreError> {
        for attempt in 1..=self.config.store_retry.max_attempts.max(1) {
            let current = self.get(connector_id).await?;
            if current.status == ConnectorStatus::InUse {
                return Err(CoreError::Conflict(format!(
                    "Connector '{connector_id}' has an active job and cannot be deleted"
                )));
            }

            match self.store.delete_connector(connector_id, current.version).await {
                Ok(()) => {
                    tracing::info!(connector_id, "Connector deleted");
                    return Ok(());
                }
                Err(e) if e.is_version_conflict() => {
                    tracing::debug!(connector_id, attempt, "Connector changed during delete, re-reading");
                    pause_after_conflict(&self.config.store_retry, attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::TransientStore(format!(
            "Connector '{connector_id}' kept changing while being deleted"
        )))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ccf_core::connector::{ContainerSpec, ResourceRequirements};
    use ccf_db::MemoryStore;

    use super::*;
    use crate::admission::AdmissionController;

    fn new_connector(name: &str) -> NewConnector {
        NewConnector {
            name: name.into(),
            description: Some("Nightly CRM export".into()),
            container_spec: ContainerSpec {
                image_uri: "registry.local/crm:1".into(),
                execution_role: "exec".into(),
                job_role: None,
                resource_requirements: ResourceRequirements::default(),
                timeout_secs: 3600,
            },
        }
    }

    fn registry() -> (Arc<MemoryStore>, ConnectorRegistry) {
        let store = Arc::new(MemoryStore::default());
        let registry = ConnectorRegistry::new(store.clone(), Arc::new(OrchestratorConfig::default()));
        (store, registry)
    }

    #[tokio::test]
    async fn create_assigns_id_and_first_version() {
        let (_, registry) = registry();
        let connector = registry.create(new_connector("crm-sync")).await.unwrap();

        assert!(connector.connector_id.starts_with("cc-"));
        assert_eq!(connector.status, ConnectorStatus::Available);
        assert_eq!(connector.version, 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_name() {
        let (_, registry) = registry();
        assert_matches!(
            registry.create(new_connector("crm sync!")).await,
            Err(CoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn update_changes_fields_and_bumps_version() {
        let (store, registry) = registry();
        let connector = registry.create(new_connector("crm-sync")).await.unwrap();
        store.inject_version_conflicts(1);

        let updated = registry
            .update(
                &connector.connector_id,
                ConnectorUpdate {
                    name: Some("crm-sync-v2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "crm-sync-v2");
        assert_eq!(updated.description, connector.description);
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let (_, registry) = registry();
        let connector = registry.create(new_connector("crm-sync")).await.unwrap();
        assert_matches!(
            registry
                .update(&connector.connector_id, ConnectorUpdate::default())
                .await,
            Err(CoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn delete_refuses_in_use_connector() {
        let (store, registry) = registry();
        let connector = registry.create(new_connector("crm-sync")).await.unwrap();
        let admission = AdmissionController::new(store, Arc::new(OrchestratorConfig::default()));
        admission
            .start_job(&connector.connector_id, Vec::new())
            .await
            .unwrap();

        assert_matches!(
            registry.delete(&connector.connector_id).await,
            Err(CoreError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn delete_removes_connector() {
        let (_, registry) = registry();
        let connector = registry.create(new_connector("crm-sync")).await.unwrap();

        registry.delete(&connector.connector_id).await.unwrap();
        assert_matches!(
            registry.get(&connector.connector_id).await,
            Err(CoreError::NotFound { .. })
        );
        assert_matches!(
            registry.delete(&connector.connector_id).await,
            Err(CoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn list_clamps_limit() {
        let (_, registry) = registry();
        for i in 0..3 {
            registry.create(new_connector(&format!("c-{i}"))).await.unwrap();
        }
        assert_eq!(registry.list(Some(2), None).await.unwrap().len(), 2);
        assert_eq!(registry.list(Some(0), None).await.unwrap().len(), 1);
        assert_eq!(registry.list(None, Some(2)).await.unwrap().len(), 1);
    }
}
