use thiserror::Error;

use crate::queue::{QueueError, TaskError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RatingError {
    /// The inputs cannot produce a rating no matter how often we retry
    #[error("Rating invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl RatingError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        RatingError::Invariant(msg.into())
    }
}

impl From<RatingError> for TaskError {
    fn from(err: RatingError) -> Self {
        match err {
            RatingError::Invariant(msg) => TaskError::Fatal(msg),
            RatingError::Store(err) => err.into(),
            RatingError::Queue(err) => err.into(),
        }
    }
}
