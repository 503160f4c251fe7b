//! Inbound terminal events from the execution backend.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use ccf_core::completion::TerminalEvent;
use ccf_core::status::JobStatus;
use serde::Serialize;

use crate::error::AppResult;
use crate::extract::AppJson;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct EventReceipt {
    pub job_id: String,
    /// Whether this delivery changed the job. Redeliveries and events for
    /// unknown jobs are accepted but not applied.
    pub applied: bool,
    /// The terminal status written, when applied.
    pub status: Option<JobStatus>,
}

/// POST /api/v1/backend/events
///
/// Always 200 for a well-formed event so the backend stops redelivering;
/// only store failures produce an error status.
pub async fn receive_event(
    State(state): State<AppState>,
    AppJson(event): AppJson<TerminalEvent>,
) -> AppResult<impl IntoResponse> {
    let applied = state.orchestrator.completion.handle_event(&event).await?;

    tracing::info!(
        job_id = %event.correlation_id,
        outcome = ?event.outcome,
        applied = applied.is_some(),
        "Backend terminal event received",
    );

    Ok(Json(DataResponse {
        data: EventReceipt {
            job_id: event.correlation_id,
            applied: applied.is_some(),
            status: applied.map(|job| job.status),
        },
    }))
}
