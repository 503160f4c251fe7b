//! Periodic deletion of terminal jobs past their retention.
//!
//! Every terminal job carries `expires_at = completed_at + JOB_RETENTION_DAYS`.
//! This task deletes the expired ones on a fixed interval.

use std::sync::Arc;

use ccf_core::error::CoreError;
use ccf_db::MetadataStore;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;

pub struct RetentionSweeper {
    store: Arc<dyn MetadataStore>,
    config: Arc<OrchestratorConfig>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn MetadataStore>, config: Arc<OrchestratorConfig>) -> Self {
        Self { store, config }
    }

    /// Delete expired terminal jobs once. Returns how many were removed.
    pub async fn sweep_once(&self) -> Result<u64, CoreError> {
        Ok(self.store.purge_expired_jobs(Utc::now()).await?)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            retention_days = self.config.job_retention.num_days(),
            interval_secs = self.config.retention_sweep_interval.as_secs(),
            "Job retention sweeper started"
        );

        let mut interval = tokio::time::interval(self.config.retention_sweep_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job retention sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(deleted) if deleted > 0 => {
                            tracing::info!(deleted, "Job retention: purged expired jobs");
                        }
                        Ok(_) => tracing::debug!("Job retention: nothing to purge"),
                        Err(e) => tracing::error!(error = %e, "Job retention: sweep failed"),
                    }
                }
            }
        }
    }
}
