//! Handlers for connector jobs, nested under `/connectors/{id}/jobs`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use ccf_core::job::{EnvironmentVariable, JobQuery};
use ccf_core::status::JobStatus;
use ccf_core::types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extract::{AppJson, AppQuery};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /connectors/{id}/jobs`.
#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    /// Passed to the container after the injected `CCF_` variables.
    #[serde(default)]
    pub environment: Vec<EnvironmentVariable>,
}

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct StopJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/connectors/{id}/jobs
///
/// Admit a job for an `AVAILABLE` connector. Returns 201; the job is
/// `STARTED` and is dispatched asynchronously. 409 if the connector is
/// already running a job.
pub async fn start_job(
    State(state): State<AppState>,
    Path(connector_id): Path<String>,
    AppJson(input): AppJson<StartJobRequest>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .orchestrator
        .admission
        .start_job(&connector_id, input.environment)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: StartJobResponse {
                job_id: job.job_id,
                status: job.status,
                created_at: job.created_at,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/connectors/{id}/jobs
///
/// Supports optional `status`, `limit`, and `offset` query parameters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(connector_id): Path<String>,
    AppQuery(query): AppQuery<JobQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .orchestrator
        .admission
        .list_jobs(&connector_id, &query)
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/connectors/{id}/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path((connector_id, job_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .orchestrator
        .admission
        .get_job(&connector_id, &job_id)
        .await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

/// POST /api/v1/connectors/{id}/jobs/{job_id}/stop
///
/// Request a stop. Returns 202 with `STOPPING`; the job reaches `STOPPED`
/// once the backend confirms. Repeating the request is harmless. 409 if
/// the job already finished.
pub async fn stop_job(
    State(state): State<AppState>,
    Path((connector_id, job_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .orchestrator
        .admission
        .stop_job(&connector_id, &job_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: StopJobResponse {
                job_id: job.job_id,
                status: job.status,
            },
        }),
    ))
}
