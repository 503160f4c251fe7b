use axum::routing::get;
use axum::Router;

use crate::handlers::connectors;
use crate::state::AppState;

/// Routes mounted at `/connectors`.
///
/// ```text
/// GET    /                -> list_connectors
/// POST   /                -> create_connector
/// GET    /{id}            -> get_connector
/// PUT    /{id}            -> update_connector
/// DELETE /{id}            -> delete_connector
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(connectors::list_connectors).post(connectors::create_connector),
        )
        .route(
            "/{id}",
            get(connectors::get_connector)
                .put(connectors::update_connector)
                .delete(connectors::delete_connector),
        )
}
