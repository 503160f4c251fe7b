pub mod backend_events;
pub mod connectors;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /connectors                                      list, create
/// /connectors/{id}                                 get, update, delete
/// /connectors/{id}/jobs                            list, start
/// /connectors/{id}/jobs/{job_id}                   get
/// /connectors/{id}/jobs/{job_id}/stop              stop (POST)
///
/// /backend/events                                  terminal event webhook (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/connectors", connectors::router().merge(jobs::router()))
        .nest("/backend", backend_events::router())
}
