use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{game::Game, rating::RatingSnapshot, settlement::GameResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ban {
    /// The two users who may not share a game
    pub user_ids: Vec<String>,
    /// The users who asked for the ban
    pub owner_ids: Vec<String>,
}

impl Ban {
    pub fn new(owner: &str, banned: &str) -> Self {
        Self {
            user_ids: vec![owner.to_string(), banned.to_string()],
            owner_ids: vec![owner.to_string()],
        }
    }

    /// Stable key: the sorted pair of user ids
    pub fn key(&self) -> String {
        let mut ids = self.user_ids.clone();
        ids.sort();
        ids.join("/")
    }

    pub fn owned_by(&self, user_id: &str) -> bool {
        self.owner_ids.iter().any(|u| u == user_id)
    }

    pub fn shared_by(&self, user_id: &str) -> bool {
        self.user_ids.iter().any(|u| u == user_id)
    }
}

/// Who missed orders, submitted orders or declared ready in one resolved phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub game_id: String,
    pub phase_ordinal: u32,
    #[serde(default)]
    pub nmr_users: Vec<String>,
    #[serde(default)]
    pub active_users: Vec<String>,
    #[serde(default)]
    pub ready_users: Vec<String>,
    #[serde(default)]
    pub private: bool,
}

impl PhaseResult {
    pub fn key(&self) -> String {
        format!("{}/{}", self.game_id, self.phase_ordinal)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        [&self.nmr_users, &self.active_users, &self.ready_users]
            .into_iter()
            .any(|users| users.iter().any(|u| u == user_id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsNumbers {
    pub joined_games: u32,
    pub started_games: u32,
    pub finished_games: u32,

    pub solo_games: u32,
    pub dias_games: u32,
    pub eliminated_games: u32,
    pub dropped_games: u32,

    #[serde(default)]
    pub nmr_phases: u32,
    #[serde(default)]
    pub active_phases: u32,
    #[serde(default)]
    pub ready_phases: u32,
    /// (ready + active) / (nmr + 1)
    #[serde(default)]
    pub reliability: f64,
    /// ready / (active + nmr + 1)
    #[serde(default)]
    pub quickness: f64,

    pub owned_bans: u32,
    pub shared_bans: u32,
    pub hated: f64,
    pub hater: f64,
}

impl StatsNumbers {
    /// Counts one privacy class of games, results and phases; bans apply to
    /// both classes.
    pub fn recalculate(
        user_id: &str,
        private: bool,
        games: &[Game],
        results: &[GameResult],
        phases: &[PhaseResult],
        owned_bans: u32,
        shared_bans: u32,
    ) -> Self {
        let games: Vec<&Game> = games
            .iter()
            .filter(|g| g.private == private && g.has_member(user_id))
            .collect();
        let results: Vec<&GameResult> = results.iter().filter(|r| r.private == private).collect();
        let phases: Vec<&PhaseResult> = phases.iter().filter(|p| p.private == private).collect();

        let count_results = |pick: fn(&GameResult) -> &Vec<String>| {
            results
                .iter()
                .filter(|r| pick(r).iter().any(|u| u == user_id))
                .count() as u32
        };

        let count_phases = |pick: fn(&PhaseResult) -> &Vec<String>| {
            phases
                .iter()
                .filter(|p| pick(p).iter().any(|u| u == user_id))
                .count() as u32
        };

        let mut numbers = Self {
            joined_games: games.len() as u32,
            started_games: games.iter().filter(|g| g.started).count() as u32,
            finished_games: games.iter().filter(|g| g.finished).count() as u32,
            solo_games: results
                .iter()
                .filter(|r| r.solo_winner_user.as_deref() == Some(user_id))
                .count() as u32,
            dias_games: count_results(|r| &r.dias_users),
            eliminated_games: count_results(|r| &r.eliminated_users),
            dropped_games: count_results(|r| &r.nmr_users),
            nmr_phases: count_phases(|p| &p.nmr_users),
            active_phases: count_phases(|p| &p.active_users),
            ready_phases: count_phases(|p| &p.ready_users),
            reliability: 0.0,
            quickness: 0.0,
            owned_bans,
            shared_bans,
            hated: 0.0,
            hater: 0.0,
        };

        let nmr = f64::from(numbers.nmr_phases);
        let active = f64::from(numbers.active_phases);
        let ready = f64::from(numbers.ready_phases);
        numbers.reliability = (ready + active) / (nmr + 1.0);
        numbers.quickness = ready / (active + nmr + 1.0);

        let denominator = f64::from(numbers.started_games + 1);
        numbers.hater = f64::from(owned_bans) / denominator;
        numbers.hated = (f64::from(shared_bans) - f64::from(owned_bans)) / denominator;
        numbers
    }
}

/// Derived per-user projection, rebuilt wholesale on every recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub public: StatsNumbers,
    pub private: StatsNumbers,
    pub rating: RatingSnapshot,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Member;

    fn game(id: &str, started: bool, finished: bool, private: bool) -> Game {
        let mut game = Game::new(
            id,
            id,
            vec![Member::new("alice", "Austria"), Member::new("bob", "England")],
        );
        game.started = started;
        game.finished = finished;
        game.private = private;
        game
    }

    fn result(game_id: &str, solo: Option<&str>, eliminated: &[&str]) -> GameResult {
        GameResult {
            game_id: game_id.to_string(),
            solo_winner_member: solo.map(|_| "Austria".to_string()),
            solo_winner_user: solo.map(str::to_string),
            dias_users: if solo.is_none() {
                vec!["alice".into(), "bob".into()]
            } else {
                vec![]
            },
            eliminated_users: eliminated.iter().map(|s| s.to_string()).collect(),
            all_users: vec!["alice".into(), "bob".into()],
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    #[test]
    fn counts_games_and_results_for_one_privacy_class() {
        let games = vec![
            game("g1", true, true, false),
            game("g2", true, false, false),
            game("g3", false, false, false),
            game("g4", true, true, true),
        ];
        let results = vec![
            result("g1", Some("alice"), &["bob"]),
            result("g5", None, &[]),
        ];

        let numbers = StatsNumbers::recalculate("alice", false, &games, &results, &[], 1, 3);

        assert_eq!(numbers.joined_games, 3);
        assert_eq!(numbers.started_games, 2);
        assert_eq!(numbers.finished_games, 1);
        assert_eq!(numbers.solo_games, 1);
        assert_eq!(numbers.dias_games, 1);
        assert_eq!(numbers.eliminated_games, 0);
        assert!((numbers.hater - 1.0 / 3.0).abs() < 1e-9);
        assert!((numbers.hated - 2.0 / 3.0).abs() < 1e-9);

        let private = StatsNumbers::recalculate("alice", true, &games, &results, &[], 1, 3);
        assert_eq!(private.joined_games, 1);
        assert_eq!(private.solo_games, 0);
    }

    fn phase(ordinal: u32, nmr: &[&str], active: &[&str], ready: &[&str], private: bool) -> PhaseResult {
        let users = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect();
        PhaseResult {
            game_id: "g1".into(),
            phase_ordinal: ordinal,
            nmr_users: users(nmr),
            active_users: users(active),
            ready_users: users(ready),
            private,
        }
    }

    #[test]
    fn phases_feed_reliability_and_quickness() {
        let phases = vec![
            phase(1, &[], &[], &["alice", "bob"], false),
            phase(2, &["bob"], &["alice"], &[], false),
            phase(3, &[], &[], &["alice"], false),
            phase(4, &["alice"], &[], &[], false),
            phase(1, &["alice"], &[], &[], true),
        ];

        let alice = StatsNumbers::recalculate("alice", false, &[], &[], &phases, 0, 0);
        assert_eq!((alice.nmr_phases, alice.active_phases, alice.ready_phases), (1, 1, 2));
        assert!((alice.reliability - 3.0 / 2.0).abs() < 1e-9);
        assert!((alice.quickness - 2.0 / 3.0).abs() < 1e-9);

        let bob = StatsNumbers::recalculate("bob", false, &[], &[], &phases, 0, 0);
        assert!((bob.reliability - 0.5).abs() < 1e-9);
        assert!((bob.quickness - 0.5).abs() < 1e-9);

        let private = StatsNumbers::recalculate("alice", true, &[], &[], &phases, 0, 0);
        assert_eq!(private.nmr_phases, 1);
        assert_eq!(private.reliability, 0.0);
    }

    #[test]
    fn users_without_phases_have_zero_reliability() {
        let numbers = StatsNumbers::recalculate("carol", false, &[], &[], &[], 0, 0);
        assert_eq!(numbers.reliability, 0.0);
        assert_eq!(numbers.quickness, 0.0);
    }

    #[test]
    fn ban_key_ignores_order() {
        assert_eq!(Ban::new("bob", "alice").key(), Ban::new("alice", "bob").key());
        let ban = Ban::new("alice", "bob");
        assert!(ban.owned_by("alice"));
        assert!(!ban.owned_by("bob"));
        assert!(ban.shared_by("bob"));
    }
}
