use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed task payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Unknown task kind: {0}")]
    UnknownKind(String),

    #[error("Task not found: {0}")]
    NotFound(Uuid),
}
