use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{StatsNumbers, UserStats};
use crate::{
    chain::{ChainStep, StepControl, TaskChain},
    queue::{QueueError, TaskError, TaskKind},
    rating::{Rating, RatingSnapshot},
    store::{Datastore, Transaction},
};

/// Rebuilds one user's [`UserStats`] from games, game and phase results, bans
/// and ratings.
pub struct StatsStep {
    store: Arc<dyn Datastore>,
    default_rating: Rating,
}

impl StatsStep {
    pub fn new(store: Arc<dyn Datastore>, default_rating: Rating) -> Self {
        Self {
            store,
            default_rating,
        }
    }

    #[instrument(skip(self))]
    pub async fn recalculate(&self, user_id: &str) -> Result<UserStats, TaskError> {
        let (games, results, phases, bans, latest) = tokio::try_join!(
            self.store.games_for_user(user_id),
            self.store.results_for_user(user_id),
            self.store.phase_results_for_user(user_id),
            self.store.bans_for_user(user_id),
            self.store.latest_rating(user_id),
        )?;

        let owned_bans = bans.iter().filter(|b| b.owned_by(user_id)).count() as u32;
        let shared_bans = bans.iter().filter(|b| b.shared_by(user_id)).count() as u32;

        Ok(UserStats {
            user_id: user_id.to_string(),
            public: StatsNumbers::recalculate(
                user_id,
                false,
                &games,
                &results,
                &phases,
                owned_bans,
                shared_bans,
            ),
            private: StatsNumbers::recalculate(
                user_id,
                true,
                &games,
                &results,
                &phases,
                owned_bans,
                shared_bans,
            ),
            rating: latest.unwrap_or_else(|| RatingSnapshot::default_for(user_id, self.default_rating)),
            updated_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ChainStep for StatsStep {
    type Context = ();
    type Item = String;

    const KIND: TaskKind = TaskKind::UpdateUserStats;

    fn name(&self) -> &'static str {
        "StatsStep"
    }

    async fn step(
        &self,
        _context: &(),
        user_id: &String,
        tx: &mut Transaction,
        _handled: &mut BTreeSet<String>,
    ) -> Result<StepControl, TaskError> {
        if user_id.is_empty() {
            debug!("Skipping stats for empty user id");
            return Ok(StepControl::Continue);
        }

        let stats = self.recalculate(user_id).await?;
        debug!(
            user_id = %user_id,
            started_games = stats.public.started_games,
            finished_games = stats.public.finished_games,
            "Recalculated user stats"
        );
        tx.put_user_stats(stats);
        Ok(StepControl::Continue)
    }
}

pub type StatsChain = TaskChain<StatsStep>;

/// Entry point for scheduling stats recomputation of a list of users
pub struct StatsRecalculator {
    chain: Arc<StatsChain>,
    delay: Duration,
}

impl StatsRecalculator {
    pub fn new(store: Arc<dyn Datastore>, default_rating: Rating, delay: Duration) -> Self {
        Self {
            chain: Arc::new(TaskChain::new(StatsStep::new(Arc::clone(&store), default_rating), store)),
            delay,
        }
    }

    /// The handler to register for `update_user_stats` tasks
    pub fn chain(&self) -> Arc<StatsChain> {
        Arc::clone(&self.chain)
    }

    /// Starts a recomputation chain inside an open transaction.
    pub fn start(tx: &mut Transaction, user_ids: Vec<String>) -> Result<bool, QueueError> {
        StatsChain::start(tx, (), dedup_user_ids(user_ids))
    }

    /// Starts a recomputation chain after the configured delay.
    pub async fn schedule(&self, user_ids: Vec<String>) -> Result<bool, TaskError> {
        self.chain.schedule((), dedup_user_ids(user_ids), self.delay).await
    }
}

/// Drops empty and repeated ids, keeping first occurrences in order.
pub fn dedup_user_ids(user_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    user_ids
        .into_iter()
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        game::{Game, Member},
        queue::{InMemoryTaskQueue, Worker, WorkerConfig},
        settlement::GameResult,
        stats::{Ban, PhaseResult},
        store::InMemoryDatastore,
    };

    fn fixture() -> (Arc<InMemoryTaskQueue>, Arc<InMemoryDatastore>, StatsRecalculator) {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let store = Arc::new(InMemoryDatastore::new(queue.clone()));
        let recalculator = StatsRecalculator::new(
            store.clone(),
            Rating::new(1500.0, 350.0, 0.06),
            Duration::ZERO,
        );
        (queue, store, recalculator)
    }

    async fn seed(store: &InMemoryDatastore) {
        let mut finished = Game::new(
            "g1",
            "Finished",
            vec![Member::new("alice", "Austria"), Member::new("bob", "England")],
        );
        finished.finished = true;
        let running = Game::new(
            "g2",
            "Running",
            vec![Member::new("alice", "France"), Member::new("carol", "Italy")],
        );

        let mut tx = Transaction::new();
        tx.put_game(finished);
        tx.put_game(running);
        tx.put_game_result(GameResult {
            game_id: "g1".into(),
            solo_winner_member: Some("Austria".into()),
            solo_winner_user: Some("alice".into()),
            eliminated_users: vec!["bob".into()],
            all_users: vec!["alice".into(), "bob".into()],
            created_at: Utc::now(),
            ..Default::default()
        });
        tx.put_ban(Ban::new("alice", "bob"));
        tx.put_ban(Ban::new("carol", "alice"));
        store.commit(tx).await.unwrap();
    }

    #[test]
    fn dedup_keeps_first_occurrences() {
        let ids = dedup_user_ids(vec![
            "b".into(),
            "a".into(),
            "".into(),
            "b".into(),
            "c".into(),
        ]);
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn recomputes_every_scheduled_user() {
        let (queue, store, recalculator) = fixture();
        seed(&store).await;

        recalculator
            .schedule(vec!["alice".into(), "bob".into(), "alice".into()])
            .await
            .unwrap();
        let worker = Worker::new(queue.clone(), WorkerConfig::default())
            .with_handler(TaskKind::UpdateUserStats, recalculator.chain());
        assert_eq!(worker.run_until_idle().await.unwrap(), 2);

        let alice = store.get_user_stats("alice").await.unwrap().unwrap();
        assert_eq!(alice.public.joined_games, 2);
        assert_eq!(alice.public.started_games, 2);
        assert_eq!(alice.public.finished_games, 1);
        assert_eq!(alice.public.solo_games, 1);
        assert_eq!(alice.public.owned_bans, 1);
        assert_eq!(alice.public.shared_bans, 2);
        assert!(alice.rating.is_default());
        assert_eq!(alice.private.joined_games, 0);
        assert_eq!(alice.private.owned_bans, 1);

        let bob = store.get_user_stats("bob").await.unwrap().unwrap();
        assert_eq!(bob.public.eliminated_games, 1);
        assert_eq!(bob.public.owned_bans, 0);
        assert!((bob.public.hated - 0.5).abs() < 1e-9);

        assert!(store.get_user_stats("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recomputation_overwrites_the_previous_projection() {
        let (queue, store, recalculator) = fixture();
        seed(&store).await;
        let worker = Worker::new(queue.clone(), WorkerConfig::default())
            .with_handler(TaskKind::UpdateUserStats, recalculator.chain());

        recalculator.schedule(vec!["carol".into()]).await.unwrap();
        worker.run_until_idle().await.unwrap();
        assert_eq!(
            store.get_user_stats("carol").await.unwrap().unwrap().public.joined_games,
            1
        );

        let mut tx = Transaction::new();
        tx.put_game(Game::new("g3", "New", vec![Member::new("carol", "Russia")]));
        store.commit(tx).await.unwrap();

        recalculator.schedule(vec!["carol".into()]).await.unwrap();
        worker.run_until_idle().await.unwrap();
        assert_eq!(
            store.get_user_stats("carol").await.unwrap().unwrap().public.joined_games,
            2
        );
    }

    #[tokio::test]
    async fn phase_results_drive_reliability_and_quickness() {
        let (queue, store, recalculator) = fixture();
        seed(&store).await;
        let mut tx = Transaction::new();
        for (ordinal, ready) in [(1, true), (2, true), (3, false)] {
            tx.put_phase_result(PhaseResult {
                game_id: "g1".into(),
                phase_ordinal: ordinal,
                nmr_users: if ready { vec![] } else { vec!["bob".into()] },
                active_users: vec![],
                ready_users: if ready {
                    vec!["alice".into(), "bob".into()]
                } else {
                    vec!["alice".into()]
                },
                private: false,
            });
        }
        store.commit(tx).await.unwrap();

        recalculator
            .schedule(vec!["alice".into(), "bob".into()])
            .await
            .unwrap();
        let worker = Worker::new(queue.clone(), WorkerConfig::default())
            .with_handler(TaskKind::UpdateUserStats, recalculator.chain());
        worker.run_until_idle().await.unwrap();

        let alice = store.get_user_stats("alice").await.unwrap().unwrap();
        assert_eq!(alice.public.ready_phases, 3);
        assert_eq!(alice.public.nmr_phases, 0);
        assert!((alice.public.reliability - 3.0).abs() < 1e-9);
        assert!((alice.public.quickness - 3.0).abs() < 1e-9);

        let bob = store.get_user_stats("bob").await.unwrap().unwrap();
        assert_eq!(bob.public.ready_phases, 2);
        assert_eq!(bob.public.nmr_phases, 1);
        assert!((bob.public.reliability - 1.0).abs() < 1e-9);
        assert!((bob.public.quickness - 1.0).abs() < 1e-9);
        assert_eq!(bob.private.nmr_phases, 0);
    }

    #[tokio::test]
    async fn failed_reads_leave_the_step_retryable() {
        let (_queue, store, _recalculator) = fixture();
        seed(&store).await;
        store.fail_next_reads(1);

        let step = StatsStep::new(store.clone(), Rating::new(1500.0, 350.0, 0.06));
        let err = step.recalculate("alice").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(step.recalculate("alice").await.is_ok());
    }
}
