use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Job routes, merged into the `/connectors` router.
///
/// ```text
/// GET    /{id}/jobs                   -> list_jobs
/// POST   /{id}/jobs                   -> start_job
/// GET    /{id}/jobs/{job_id}          -> get_job
/// POST   /{id}/jobs/{job_id}/stop     -> stop_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/jobs", get(jobs::list_jobs).post(jobs::start_job))
        .route("/{id}/jobs/{job_id}", get(jobs::get_job))
        .route("/{id}/jobs/{job_id}/stop", post(jobs::stop_job))
}
