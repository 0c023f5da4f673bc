pub mod errors;
pub mod glicko;
pub mod models;
pub mod schedule;
pub mod updater;

pub use errors::RatingError;
pub use glicko::{pairwise_outcome, Glicko2, RatingAlgorithm};
pub use models::{Rating, RatingSnapshot};
pub use schedule::{enqueue_rating_scan, start_rating_schedule};
pub use updater::{RateMode, RatingOutcome, RatingTaskHandler, RatingUpdater, RerateCursor};
