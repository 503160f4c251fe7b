use axum::routing::post;
use axum::Router;

use crate::handlers::backend_events;
use crate::state::AppState;

/// Routes mounted at `/backend`.
pub fn router() -> Router<AppState> {
    Router::new().route("/events", post(backend_events::receive_event))
}
