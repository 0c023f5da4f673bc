use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::rating::enqueue_rating_scan;
use crate::shared::{AppError, AppState};

/// GET /health
/// Reports liveness and the number of pending tasks
#[instrument(name = "health", skip(state))]
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let pending = state.queue.pending().await?;
    Ok(Json(json!({ "status": "ok", "pending_tasks": pending })))
}

/// POST /ratings/update
#[instrument(name = "trigger_rating_scan", skip(state))]
pub async fn update_ratings(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let task = enqueue_rating_scan(state.queue.as_ref()).await?;
    info!(task_id = %task.id, "Rating scan requested");
    Ok((StatusCode::ACCEPTED, Json(json!({ "scheduled": task.id }))))
}

/// POST /ratings/rerate
/// Drops every rating snapshot and rebuilds them from the oldest result on
#[instrument(name = "trigger_rerate", skip(state))]
pub async fn rerate(State(state): State<AppState>) -> Result<(StatusCode, Json<Value>), AppError> {
    let deleted = state.updater.start_rerate().await?;
    info!(deleted, "Re-rating requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "scheduled": "rerate", "deleted_snapshots": deleted })),
    ))
}

/// POST /tasks/dead/requeue
/// Gives every dead-lettered task a fresh set of attempts, e.g. after an outage
#[instrument(name = "requeue_dead_letters", skip(state))]
pub async fn requeue_dead_letters(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let requeued = state.queue.requeue_dead_letters().await?;
    info!(requeued, "Dead letters requeued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "requeued": requeued }))))
}

/// POST /users/:user_id/stats
#[instrument(name = "trigger_user_stats", skip(state))]
pub async fn update_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::BadRequest("user id must not be empty".to_string()));
    }
    let scheduled = state.stats.schedule(vec![user_id.clone()]).await?;
    info!(user_id = %user_id, scheduled, "Stats recomputation requested");
    Ok((StatusCode::ACCEPTED, Json(json!({ "scheduled": scheduled }))))
}
