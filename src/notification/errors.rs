use thiserror::Error;

use crate::queue::{QueueError, TaskError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Game {0} not found")]
    GameNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<NotificationError> for TaskError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::GameNotFound(_) => TaskError::Fatal(err.to_string()),
            NotificationError::Store(err) => err.into(),
            NotificationError::Queue(err) => err.into(),
            NotificationError::Config(err) => TaskError::Retryable(err.to_string()),
        }
    }
}

/// Failure reported by a notification transport
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The device token is no longer valid
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The transport refused the payload itself
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}
