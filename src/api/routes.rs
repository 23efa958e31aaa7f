//! API route definitions

use axum::routing::get;
use axum::routing::post;
use axum::Router;

use super::handlers;
use super::handlers::AppState;

/// Create the API router
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Chat pipeline
        .route("/chat", post(handlers::chat))
        .route("/classify", post(handlers::classify))
        // Session history
        .route(
            "/history/:session_id",
            get(handlers::get_history).delete(handlers::clear_history),
        )
        // Knowledge base
        .route("/knowledge", post(handlers::add_knowledge))
        .route("/stats", get(handlers::get_stats))
        .with_state(state)
}
