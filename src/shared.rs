use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::queue::{QueueError, TaskError, TaskQueue};
use crate::rating::{RatingError, RatingUpdater};
use crate::stats::StatsRecalculator;
use crate::store::{Datastore, StoreError};

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Datastore>,
    pub queue: Arc<dyn TaskQueue>,
    pub updater: Arc<RatingUpdater>,
    pub stats: Arc<StatsRecalculator>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Datastore>,
        queue: Arc<dyn TaskQueue>,
        updater: Arc<RatingUpdater>,
        stats: Arc<StatsRecalculator>,
    ) -> Self {
        Self {
            store,
            queue,
            updater,
            stats,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            AppError::Unavailable(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        TaskError::from(err).into()
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        if err.is_retryable() {
            AppError::Unavailable(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<RatingError> for AppError {
    fn from(err: RatingError) -> Self {
        TaskError::from(err).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::queue::InMemoryTaskQueue;
    use crate::rating::{Glicko2, RatingAlgorithm};
    use crate::store::InMemoryDatastore;
    use std::time::Duration;

    /// Builds an `AppState` over in-memory storage
    pub struct AppStateBuilder {
        queue: Arc<InMemoryTaskQueue>,
        stats_delay: Duration,
    }

    impl AppStateBuilder {
        pub fn new() -> Self {
            Self {
                queue: Arc::new(InMemoryTaskQueue::new()),
                stats_delay: Duration::ZERO,
            }
        }

        pub fn build(self) -> (AppState, Arc<InMemoryDatastore>) {
            let store = Arc::new(InMemoryDatastore::new(Arc::clone(&self.queue)));
            let glicko = Arc::new(Glicko2::default());
            let default_rating = glicko.default_rating();
            let state = AppState::new(
                store.clone(),
                self.queue,
                Arc::new(RatingUpdater::new(store.clone(), glicko)),
                Arc::new(StatsRecalculator::new(
                    store.clone(),
                    default_rating,
                    self.stats_delay,
                )),
            );
            (state, store)
        }
    }

    impl Default for AppStateBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
