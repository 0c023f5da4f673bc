use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Concurrent modification of {0}")]
    Conflict(String),

    #[error("Task {0} was already consumed")]
    TaskConsumed(Uuid),

    #[error("{} of the reads failed: {:?}", .0.len(), .0)]
    Multiple(Vec<StoreError>),
}

impl StoreError {
    /// Whether trying the same operation again later can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Database(_) | StoreError::Conflict(_) => true,
            StoreError::Serialization(_) | StoreError::TaskConsumed(_) => false,
            StoreError::Multiple(errors) => errors.iter().all(StoreError::is_transient),
        }
    }
}

/// Folds the outcomes of concurrent reads into one result, keeping every failure.
pub fn collect_reads<T>(results: Vec<Result<T, StoreError>>) -> Result<Vec<T>, StoreError> {
    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(err) => errors.push(err),
        }
    }

    match errors.len() {
        0 => Ok(values),
        1 => Err(errors.remove(0)),
        _ => Err(StoreError::Multiple(errors)),
    }
}
