use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{assign_scores, BoardOutcome, GameResult, GameScore, SettlementError};
use crate::{
    game::Game,
    queue::{Task, TaskKind},
    stats::StatsRecalculator,
    store::{Datastore, EntityKey, StoreError, Transaction},
};

/// Turns a finished board into a stored game result and kicks off the
/// rating and stats work that depends on it.
pub struct SettlementService {
    store: Arc<dyn Datastore>,
    rating_delay: Duration,
}

impl SettlementService {
    pub fn new(store: Arc<dyn Datastore>, rating_delay: Duration) -> Self {
        Self {
            store,
            rating_delay,
        }
    }

    /// Settles `game_id` once. Settling an already settled game returns the
    /// stored result unchanged.
    #[instrument(skip(self, outcome), fields(game_id = %game_id))]
    pub async fn settle(
        &self,
        game_id: &str,
        outcome: &BoardOutcome,
    ) -> Result<GameResult, SettlementError> {
        if let Some(existing) = self.store.get_game_result(game_id).await? {
            debug!("Game already settled");
            return Ok(existing.value);
        }

        let game = self
            .store
            .get_game(game_id)
            .await?
            .ok_or_else(|| SettlementError::GameNotFound(game_id.to_string()))?;
        let result = build_result(&game.value, outcome)?;

        let mut finished = game.value.clone();
        finished.finished = true;

        let mut tx = Transaction::new();
        tx.expect_version(EntityKey::GameResult(game_id.to_string()), 0);
        tx.expect_version(EntityKey::Game(game_id.to_string()), game.version);
        tx.put_game_result(result.clone());
        tx.put_game(finished);
        tx.enqueue(Task::new(TaskKind::UpdateRatings, &())?.delayed(self.rating_delay));
        StatsRecalculator::start(&mut tx, result.all_users.clone())?;

        match self.store.commit(tx).await {
            Ok(()) => {
                info!(
                    solo = ?result.solo_winner_member,
                    members = result.scores.len(),
                    "Game settled"
                );
                Ok(result)
            }
            Err(StoreError::Conflict(key)) => {
                // A concurrent settle may have won; its result is as good as ours
                match self.store.get_game_result(game_id).await? {
                    Some(existing) => {
                        info!("Game got settled while we worked");
                        Ok(existing.value)
                    }
                    None => {
                        warn!(%key, "Game changed while settling");
                        Err(StoreError::Conflict(key).into())
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Classifies members and assigns scores for a finished board.
pub fn build_result(game: &Game, outcome: &BoardOutcome) -> Result<GameResult, SettlementError> {
    if game.members.is_empty() {
        return Err(SettlementError::NoMembers(game.id.clone()));
    }
    if let Some(winner) = &outcome.solo_winner {
        if game.member_by_nation(winner).is_none() {
            return Err(SettlementError::UnknownWinner(winner.clone()));
        }
    }

    let scores: Vec<GameScore> = game
        .members
        .iter()
        .map(|m| GameScore::new(&m.nation, &m.user_id, outcome.sc_count(&m.nation)))
        .collect();

    let survivors: Vec<&GameScore> = scores.iter().filter(|s| s.scs > 0).collect();
    let solo = outcome.solo_winner.clone().or_else(|| match survivors.as_slice() {
        [only] => Some(only.member.clone()),
        _ => None,
    });
    let scores = assign_scores(scores, solo.as_deref());

    let mut result = GameResult {
        game_id: game.id.clone(),
        all_users: game.user_ids(),
        private: game.private,
        created_at: Utc::now(),
        ..GameResult::default()
    };

    for score in &scores {
        if score.scs == 0 {
            result.eliminated_members.push(score.member.clone());
            result.eliminated_users.push(score.user_id.clone());
        } else if solo.is_none() {
            result.dias_members.push(score.member.clone());
            result.dias_users.push(score.user_id.clone());
        }
        if outcome.nmr_members.contains(&score.member) {
            result.nmr_members.push(score.member.clone());
            result.nmr_users.push(score.user_id.clone());
        }
    }
    if let Some(winner) = solo {
        result.solo_winner_user = game.member_by_nation(&winner).map(|m| m.user_id.clone());
        result.solo_winner_member = Some(winner);
    }
    result.scores = scores;

    Ok(result)
}
