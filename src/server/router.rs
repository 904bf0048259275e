use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Build the complete axum Router with all API routes.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/logs", post(handlers::send_log).get(handlers::get_logs))
        .route("/logs/query", post(handlers::query_logs))
        .route("/materializer/start", post(handlers::start_materializer))
        .route("/materializer/stop", post(handlers::stop_materializer))
        .route("/status", get(handlers::status))
        .route("/dead-letters", get(handlers::dead_letters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
