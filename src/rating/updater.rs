use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{pairwise_outcome, Rating, RatingAlgorithm, RatingError, RatingSnapshot};
use crate::{
    game::Game,
    queue::{Task, TaskError, TaskHandler, TaskKind},
    settlement::{GameResult, ResultCursor},
    stats::StatsRecalculator,
    store::{collect_reads, Datastore, EntityKey, StoreError, Transaction, Versioned},
};

#[derive(Debug, Clone, PartialEq)]
pub enum RatingOutcome {
    Rated { game_id: String, snapshots: usize },
    /// Another invocation rated the result first
    AlreadyRated { game_id: String },
    NothingToRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMode {
    /// Leave results that are already rated alone
    Unrated,
    /// Rate regardless of the flag, used when rebuilding every rating
    Rerate,
}

/// Payload of a `rerate` task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RerateCursor {
    pub after: Option<ResultCursor>,
}

pub struct RatingUpdater {
    store: Arc<dyn Datastore>,
    algorithm: Arc<dyn RatingAlgorithm>,
}

impl RatingUpdater {
    pub fn new(store: Arc<dyn Datastore>, algorithm: Arc<dyn RatingAlgorithm>) -> Self {
        Self { store, algorithm }
    }

    /// Rates the oldest unrated result and, if another one is waiting, chains
    /// the next scan into the same commit.
    #[instrument(skip(self))]
    pub async fn update_ratings(&self, consuming: Option<Uuid>) -> Result<RatingOutcome, RatingError> {
        let unrated = self.store.unrated_game_results(2).await?;
        let Some(oldest) = unrated.first() else {
            debug!("No unrated game results");
            return Ok(RatingOutcome::NothingToRate);
        };

        let continuation = if unrated.len() > 1 {
            Some(Task::new(TaskKind::UpdateRatings, &())?)
        } else {
            None
        };

        let Some(result) = self.store.get_game_result(&oldest.game_id).await? else {
            return Err(RatingError::invariant(format!(
                "game result {} vanished",
                oldest.game_id
            )));
        };

        self.rate_result(result, RateMode::Unrated, continuation, consuming)
            .await
    }

    /// Deletes every rating snapshot and starts rating all results again from the oldest.
    #[instrument(skip(self))]
    pub async fn start_rerate(&self) -> Result<u64, RatingError> {
        let deleted = self.store.delete_all_rating_snapshots().await?;
        let mut tx = Transaction::new();
        tx.enqueue(Task::new(TaskKind::Rerate, &RerateCursor::default())?);
        self.store.commit(tx).await?;
        info!(deleted, "Started re-rating every game result");
        Ok(deleted)
    }

    /// Rates the next result after `after`, chaining the one after it.
    #[instrument(skip(self))]
    pub async fn rerate(
        &self,
        after: Option<ResultCursor>,
        consuming: Option<Uuid>,
    ) -> Result<RatingOutcome, RatingError> {
        let next = self.store.game_results_after(after.as_ref(), 2).await?;
        let Some(first) = next.first() else {
            info!("Re-rating finished");
            return Ok(RatingOutcome::NothingToRate);
        };

        let continuation = if next.len() > 1 {
            Some(Task::new(
                TaskKind::Rerate,
                &RerateCursor {
                    after: Some(first.cursor()),
                },
            )?)
        } else {
            None
        };

        let Some(result) = self.store.get_game_result(&first.game_id).await? else {
            return Err(RatingError::invariant(format!(
                "game result {} vanished",
                first.game_id
            )));
        };

        self.rate_result(result, RateMode::Rerate, continuation, consuming)
            .await
    }

    /// Computes new ratings for every member of the result's game outside of any
    /// transaction, then commits them together with the `rated` flag if the
    /// result has not changed meanwhile.
    #[instrument(skip(self, result, continuation), fields(game_id = %result.value.game_id))]
    pub async fn rate_result(
        &self,
        result: Versioned<GameResult>,
        mode: RateMode,
        continuation: Option<Task>,
        consuming: Option<Uuid>,
    ) -> Result<RatingOutcome, RatingError> {
        let game_id = result.value.game_id.clone();
        if mode == RateMode::Unrated && result.value.rated {
            info!("Game result got rated while we worked");
            self.hand_on(continuation, consuming).await?;
            return Ok(RatingOutcome::AlreadyRated { game_id });
        }

        let snapshots = match self.compute(&result.value).await {
            Ok(snapshots) => snapshots,
            Err(RatingError::Invariant(reason)) => {
                self.set_aside(&result, &reason, continuation).await?;
                return Err(RatingError::Invariant(reason));
            }
            Err(e) => return Err(e),
        };

        let mut rated = result.value.clone();
        rated.rated = true;
        let user_ids: Vec<String> = snapshots.iter().map(|s| s.user_id.clone()).collect();

        let mut tx = Transaction::maybe_consuming(consuming);
        tx.expect_version(EntityKey::GameResult(game_id.clone()), result.version);
        tx.put_game_result(rated);
        let count = snapshots.len();
        for snapshot in snapshots {
            tx.put_rating_snapshot(snapshot);
        }
        StatsRecalculator::start(&mut tx, user_ids)?;
        if let Some(task) = continuation.clone() {
            tx.enqueue(task);
        }

        match self.store.commit(tx).await {
            Ok(()) => {
                info!(snapshots = count, "Game result rated");
                Ok(RatingOutcome::Rated {
                    game_id,
                    snapshots: count,
                })
            }
            Err(StoreError::Conflict(key)) => {
                let now_rated = self
                    .store
                    .get_game_result(&game_id)
                    .await?
                    .map_or(false, |r| r.value.rated);
                if mode == RateMode::Unrated && now_rated {
                    info!("Game result got rated while we worked");
                    self.hand_on(continuation, consuming).await?;
                    Ok(RatingOutcome::AlreadyRated { game_id })
                } else {
                    Err(StoreError::Conflict(key).into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn compute(&self, result: &GameResult) -> Result<Vec<RatingSnapshot>, RatingError> {
        let game = match self.store.get_game(&result.game_id).await? {
            Some(game) => game.value,
            None => {
                error!("Game of the result is missing");
                return Err(RatingError::invariant(format!(
                    "game {} not found",
                    result.game_id
                )));
            }
        };
        self.new_snapshots(&game, result).await
    }

    /// Marks a result that can never be rated so the unrated scan moves past
    /// it, and hands the scan on. The task itself is left for the dead-letter
    /// queue.
    async fn set_aside(
        &self,
        result: &Versioned<GameResult>,
        reason: &str,
        continuation: Option<Task>,
    ) -> Result<(), RatingError> {
        let game_id = &result.value.game_id;
        let mut marked = result.value.clone();
        marked.unratable = Some(reason.to_string());

        let mut tx = Transaction::new();
        tx.expect_version(EntityKey::GameResult(game_id.clone()), result.version);
        tx.put_game_result(marked);
        if let Some(task) = continuation {
            tx.enqueue(task);
        }
        match self.store.commit(tx).await {
            Ok(()) => {
                warn!(game_id = %game_id, reason, "Game result cannot be rated, set aside");
                Ok(())
            }
            Err(StoreError::Conflict(_)) => {
                debug!(game_id = %game_id, "Result changed while setting it aside");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// After losing a race, still consume our task and keep the scan going.
    async fn hand_on(&self, continuation: Option<Task>, consuming: Option<Uuid>) -> Result<(), RatingError> {
        if continuation.is_none() && consuming.is_none() {
            return Ok(());
        }
        let mut tx = Transaction::maybe_consuming(consuming);
        if let Some(task) = continuation {
            tx.enqueue(task);
        }
        self.store.commit(tx).await?;
        Ok(())
    }

    async fn new_snapshots(
        &self,
        game: &Game,
        result: &GameResult,
    ) -> Result<Vec<RatingSnapshot>, RatingError> {
        if result.scores.len() != game.members.len() {
            return Err(RatingError::invariant(format!(
                "{} scores for {} members",
                result.scores.len(),
                game.members.len()
            )));
        }

        let mut scores = Vec::with_capacity(game.members.len());
        for member in &game.members {
            let score = result.score_for_user(&member.user_id).ok_or_else(|| {
                RatingError::invariant(format!("no score for member {}", member.user_id))
            })?;
            scores.push(score.score);
        }

        let reads = join_all(
            game.members
                .iter()
                .map(|member| self.store.latest_rating(&member.user_id)),
        )
        .await;
        let current: Vec<Rating> = collect_reads(reads)?
            .into_iter()
            .map(|snapshot| {
                snapshot
                    .map(|s| s.parameters())
                    .unwrap_or_else(|| self.algorithm.default_rating())
            })
            .collect();

        let mut snapshots = Vec::with_capacity(game.members.len());
        for (idx, member) in game.members.iter().enumerate() {
            let mut opponents = Vec::with_capacity(current.len() - 1);
            let mut outcomes = Vec::with_capacity(current.len() - 1);
            for (other, rating) in current.iter().enumerate() {
                if other != idx {
                    opponents.push(*rating);
                    outcomes.push(pairwise_outcome(scores[idx], scores[other]));
                }
            }

            let rating = self
                .algorithm
                .rate(current[idx], &opponents, &outcomes)
                .map_err(|e| {
                    error!(user_id = %member.user_id, error = %e, "Rating algorithm rejected inputs");
                    e
                })?;
            snapshots.push(RatingSnapshot::new(
                &game.id,
                &member.user_id,
                &member.nation,
                result.created_at,
                rating,
            ));
        }
        Ok(snapshots)
    }
}

/// Serves `update_ratings` and `rerate` tasks
pub struct RatingTaskHandler {
    updater: Arc<RatingUpdater>,
}

impl RatingTaskHandler {
    pub fn new(updater: Arc<RatingUpdater>) -> Self {
        Self { updater }
    }
}

#[async_trait]
impl TaskHandler for RatingTaskHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let outcome = match task.kind {
            TaskKind::UpdateRatings => self.updater.update_ratings(Some(task.id)).await?,
            TaskKind::Rerate => {
                let cursor: RerateCursor = task.payload()?;
                self.updater.rerate(cursor.after, Some(task.id)).await?
            }
            other => return Err(TaskError::fatal(format!("cannot rate from a {other} task"))),
        };
        debug!(?outcome, "Rating task done");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RatingTaskHandler"
    }
}
