//! Handlers for the `/connectors` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use ccf_core::connector::{ConnectorUpdate, NewConnector};

use crate::error::AppResult;
use crate::extract::{AppJson, AppQuery};
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/connectors
///
/// Register a connector. Returns 201 with the created connector in
/// `AVAILABLE` state.
pub async fn create_connector(
    State(state): State<AppState>,
    AppJson(input): AppJson<NewConnector>,
) -> AppResult<impl IntoResponse> {
    let connector = state.orchestrator.registry.create(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: connector })))
}

/// GET /api/v1/connectors
pub async fn list_connectors(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    let connectors = state
        .orchestrator
        .registry
        .list(params.limit, params.offset)
        .await?;
    Ok(Json(DataResponse { data: connectors }))
}

/// GET /api/v1/connectors/{id}
pub async fn get_connector(
    State(state): State<AppState>,
    Path(connector_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let connector = state.orchestrator.registry.get(&connector_id).await?;
    Ok(Json(DataResponse { data: connector }))
}

/// PUT /api/v1/connectors/{id}
///
/// Partial update: absent fields are left unchanged.
pub async fn update_connector(
    State(state): State<AppState>,
    Path(connector_id): Path<String>,
    AppJson(input): AppJson<ConnectorUpdate>,
) -> AppResult<impl IntoResponse> {
    let connector = state
        .orchestrator
        .registry
        .update(&connector_id, input)
        .await?;
    Ok(Json(DataResponse { data: connector }))
}

/// DELETE /api/v1/connectors/{id}
///
/// Returns 204. Refused with 409 while a job is active.
pub async fn delete_connector(
    State(state): State<AppState>,
    Path(connector_id): Path<String>,
) -> AppResult<StatusCode> {
    state.orchestrator.registry.delete(&connector_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
