pub mod errors;
pub mod models;
pub mod scoring;
pub mod service;

pub use errors::SettlementError;
pub use models::{BoardOutcome, GameResult, GameScore, ResultCursor};
pub use scoring::{assign_scores, total_score, SCORE_TOTAL};
pub use service::{build_result, SettlementService};
