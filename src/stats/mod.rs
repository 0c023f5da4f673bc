pub mod models;
pub mod recalculator;

pub use models::{Ban, PhaseResult, StatsNumbers, UserStats};
pub use recalculator::{dedup_user_ids, StatsChain, StatsRecalculator, StatsStep};
