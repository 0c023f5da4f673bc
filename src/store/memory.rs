use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::{Datastore, EntityKey, StoreError, Transaction, Versioned, Write};
use crate::{
    game::Game,
    notification::UserConfig,
    queue::InMemoryTaskQueue,
    rating::RatingSnapshot,
    settlement::{GameResult, ResultCursor},
    stats::{Ban, PhaseResult, UserStats},
};

#[derive(Debug, Default)]
struct StoreState {
    games: HashMap<String, Game>,
    results: HashMap<String, GameResult>,
    snapshots: HashMap<(String, String), RatingSnapshot>,
    bans: HashMap<String, Ban>,
    phases: HashMap<String, PhaseResult>,
    user_stats: HashMap<String, UserStats>,
    user_configs: HashMap<String, UserConfig>,
    versions: HashMap<EntityKey, u64>,
}

impl StoreState {
    fn version(&self, key: &EntityKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn apply(&mut self, write: Write) {
        let key = write.key();
        match write {
            Write::Game(game) => {
                self.games.insert(game.id.clone(), game);
            }
            Write::GameResult(result) => {
                self.results.insert(result.game_id.clone(), result);
            }
            Write::RatingSnapshot(snapshot) => {
                self.snapshots.insert(
                    (snapshot.user_id.clone(), snapshot.game_id.clone()),
                    snapshot,
                );
            }
            Write::Ban(ban) => {
                self.bans.insert(ban.key(), ban);
            }
            Write::PhaseResult(phase) => {
                self.phases.insert(phase.key(), phase);
            }
            Write::UserStats(stats) => {
                self.user_stats.insert(stats.user_id.clone(), stats);
            }
            Write::UserConfig(config) => {
                self.user_configs.insert(config.user_id.clone(), config);
            }
        }
        *self.versions.entry(key).or_insert(0) += 1;
    }

    fn versioned<T: Clone>(&self, key: EntityKey, value: Option<&T>) -> Option<Versioned<T>> {
        value.map(|v| Versioned {
            value: v.clone(),
            version: self.version(&key),
        })
    }

    fn public_results_sorted(&self) -> Vec<&GameResult> {
        let mut results: Vec<&GameResult> = self.results.values().filter(|r| !r.private).collect();
        results.sort_by_key(|r| r.cursor());
        results
    }
}

/// In-memory store for development and testing.
///
/// Shares its queue so that a commit can publish the transaction's tasks
/// atomically with its writes. Transient failures can be injected to exercise
/// retry paths.
#[derive(Debug)]
pub struct InMemoryDatastore {
    state: RwLock<StoreState>,
    queue: Arc<InMemoryTaskQueue>,
    failing_commits: AtomicU32,
    failing_reads: AtomicU32,
    commits: AtomicU64,
}

impl InMemoryDatastore {
    pub fn new(queue: Arc<InMemoryTaskQueue>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            queue,
            failing_commits: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
            commits: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> Arc<InMemoryTaskQueue> {
        Arc::clone(&self.queue)
    }

    /// The next `count` commits fail with [`StoreError::Unavailable`] without
    /// applying anything.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// The next `count` entity reads fail with [`StoreError::Unavailable`].
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of committed writes to `key`
    pub async fn version_of(&self, key: &EntityKey) -> u64 {
        self.state.read().await.version(key)
    }

    pub async fn rating_snapshots(&self) -> Vec<RatingSnapshot> {
        let state = self.state.read().await;
        let mut snapshots: Vec<RatingSnapshot> = state.snapshots.values().cloned().collect();
        snapshots.sort_by(|a, b| (&a.user_id, &a.game_id).cmp(&(&b.user_id, &b.game_id)));
        snapshots
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if Self::take_failure(&self.failing_reads) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_game(&self, game_id: &str) -> Result<Option<Versioned<Game>>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state.versioned(EntityKey::Game(game_id.to_string()), state.games.get(game_id)))
    }

    async fn games_for_user(&self, user_id: &str) -> Result<Vec<Game>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state
            .games
            .values()
            .filter(|g| g.has_member(user_id))
            .cloned()
            .collect())
    }

    async fn get_game_result(
        &self,
        game_id: &str,
    ) -> Result<Option<Versioned<GameResult>>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state.versioned(
            EntityKey::GameResult(game_id.to_string()),
            state.results.get(game_id),
        ))
    }

    async fn results_for_user(&self, user_id: &str) -> Result<Vec<GameResult>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state
            .results
            .values()
            .filter(|r| r.involves(user_id))
            .cloned()
            .collect())
    }

    async fn unrated_game_results(&self, limit: usize) -> Result<Vec<GameResult>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state
            .public_results_sorted()
            .into_iter()
            .filter(|r| !r.rated && r.unratable.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn game_results_after(
        &self,
        cursor: Option<&ResultCursor>,
        limit: usize,
    ) -> Result<Vec<GameResult>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state
            .public_results_sorted()
            .into_iter()
            .filter(|r| cursor.map_or(true, |c| r.cursor() > *c))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_rating(&self, user_id: &str) -> Result<Option<RatingSnapshot>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .values()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn delete_all_rating_snapshots(&self) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let deleted = state.snapshots.len() as u64;
        state.snapshots.clear();
        state
            .versions
            .retain(|key, _| !matches!(key, EntityKey::RatingSnapshot { .. }));
        debug!(deleted, "Deleted every rating snapshot in memory");
        Ok(deleted)
    }

    async fn phase_results_for_user(&self, user_id: &str) -> Result<Vec<PhaseResult>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state
            .phases
            .values()
            .filter(|p| p.involves(user_id))
            .cloned()
            .collect())
    }

    async fn bans_for_user(&self, user_id: &str) -> Result<Vec<Ban>, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state
            .bans
            .values()
            .filter(|b| b.shared_by(user_id) || b.owned_by(user_id))
            .cloned()
            .collect())
    }

    async fn get_user_config(&self, user_id: &str) -> Result<Option<UserConfig>, StoreError> {
        self.check_read()?;
        Ok(self.state.read().await.user_configs.get(user_id).cloned())
    }

    async fn get_user_stats(&self, user_id: &str) -> Result<Option<UserStats>, StoreError> {
        self.check_read()?;
        Ok(self.state.read().await.user_stats.get(user_id).cloned())
    }

    #[instrument(skip(self, tx), fields(writes = tx.writes().len(), tasks = tx.tasks().len()))]
    async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        if Self::take_failure(&self.failing_commits) {
            warn!("Injected commit failure");
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let (expectations, writes, tasks, consumes) = tx.into_parts();

        // Store before queue, always, so commits never deadlock.
        let mut state = self.state.write().await;
        let mut queue = self.queue.state().await;

        for (key, expected) in &expectations {
            let actual = state.version(key);
            if actual != *expected {
                debug!(%key, expected, actual, "Version expectation failed");
                return Err(StoreError::Conflict(key.to_string()));
            }
        }
        if let Some(task_id) = consumes {
            if !queue.contains(&task_id) {
                return Err(StoreError::TaskConsumed(task_id));
            }
        }

        for write in writes {
            state.apply(write);
        }
        for task in tasks {
            queue.push(task);
        }
        if let Some(task_id) = consumes {
            queue.remove(&task_id);
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
