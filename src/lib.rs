// Library crate for the post-game settlement pipeline
// This file exposes the public API for the binary and integration tests

pub mod chain;
pub mod config;
pub mod game;
pub mod notification;
pub mod pipeline;
pub mod queue;
pub mod rating;
pub mod routes;
pub mod settlement;
pub mod shared;
pub mod stats;
pub mod store;

// Re-export commonly used types for easier access in tests
pub use chain::{ChainStep, StepControl, TaskChain};
pub use config::{ConfigLoader, SettlementConfig};
pub use pipeline::Pipeline;
pub use queue::{Task, TaskKind, TaskQueue, Worker};
pub use shared::{AppError, AppState};
pub use store::{Datastore, Transaction};
