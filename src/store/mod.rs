// Durable store seam. Every mutation goes through a `Transaction`, which also
// carries the task enqueues that must commit together with it.

pub use errors::{collect_reads, StoreError};
pub use memory::InMemoryDatastore;
pub use postgres::PostgresDatastore;
pub use transaction::{EntityKey, Transaction, Versioned, Write};

mod errors;
mod memory;
mod postgres;
mod transaction;

use async_trait::async_trait;

use crate::{
    game::Game,
    notification::UserConfig,
    rating::RatingSnapshot,
    settlement::{GameResult, ResultCursor},
    stats::{Ban, PhaseResult, UserStats},
};

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get_game(&self, game_id: &str) -> Result<Option<Versioned<Game>>, StoreError>;

    /// Games that have `user_id` among their members
    async fn games_for_user(&self, user_id: &str) -> Result<Vec<Game>, StoreError>;

    async fn get_game_result(
        &self,
        game_id: &str,
    ) -> Result<Option<Versioned<GameResult>>, StoreError>;

    /// Results that list `user_id` in `all_users`
    async fn results_for_user(&self, user_id: &str) -> Result<Vec<GameResult>, StoreError>;

    /// Unrated, non-private results that were not set aside as unratable,
    /// oldest first
    async fn unrated_game_results(&self, limit: usize) -> Result<Vec<GameResult>, StoreError>;

    /// Non-private results strictly after `cursor` in `(created_at, game_id)` order
    async fn game_results_after(
        &self,
        cursor: Option<&ResultCursor>,
        limit: usize,
    ) -> Result<Vec<GameResult>, StoreError>;

    /// Newest snapshot by `created_at`, if the user was ever rated
    async fn latest_rating(&self, user_id: &str) -> Result<Option<RatingSnapshot>, StoreError>;

    async fn delete_all_rating_snapshots(&self) -> Result<u64, StoreError>;

    /// Phase results that list `user_id` as missing, active or ready
    async fn phase_results_for_user(&self, user_id: &str) -> Result<Vec<PhaseResult>, StoreError>;

    async fn bans_for_user(&self, user_id: &str) -> Result<Vec<Ban>, StoreError>;

    async fn get_user_config(&self, user_id: &str) -> Result<Option<UserConfig>, StoreError>;

    async fn get_user_stats(&self, user_id: &str) -> Result<Option<UserStats>, StoreError>;

    /// Applies the whole transaction or none of it.
    ///
    /// Fails with [`StoreError::Conflict`] if a version expectation does not hold
    /// and with [`StoreError::TaskConsumed`] if the consumed task is gone.
    async fn commit(&self, tx: Transaction) -> Result<(), StoreError>;
}
