use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

/// Build the axum router with every merge endpoint.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/clients/merge", post(handler::merge_handler))
        .route("/v1/merges/:id", get(handler::merge_log_handler))
        .route("/v1/merges/:id/undo", post(handler::undo_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
