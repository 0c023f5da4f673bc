use thiserror::Error;

use crate::queue::QueueError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Game {0} not found")]
    GameNotFound(String),

    #[error("Game {0} has no members")]
    NoMembers(String),

    /// The outcome names a solo winner that is not a member of the game
    #[error("Unknown solo winner {0}")]
    UnknownWinner(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
