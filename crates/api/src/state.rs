use std::sync::Arc;

use ccf_db::MetadataStore;
use ccf_orchestrator::Orchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Connector and job metadata.
    pub store: Arc<dyn MetadataStore>,
    /// Admission, registry and completion entry points.
    pub orchestrator: Orchestrator,
}
