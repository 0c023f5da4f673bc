// Operator endpoints that trigger background work. Everything they start runs
// through the task queue like any other settlement work.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::shared::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ratings/update", post(handlers::update_ratings))
        .route("/ratings/rerate", post(handlers::rerate))
        .route("/users/:user_id/stats", post(handlers::update_user_stats))
        .route("/tasks/dead/requeue", post(handlers::requeue_dead_letters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
