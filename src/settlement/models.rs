use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::game::{Nation, Province};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameScore {
    pub member: Nation,
    pub user_id: String,
    /// Supply centers held at game end
    pub scs: u32,
    pub score: f64,
    #[serde(default)]
    pub explanation: String,
}

impl GameScore {
    pub fn new(member: impl Into<Nation>, user_id: impl Into<String>, scs: u32) -> Self {
        Self {
            member: member.into(),
            user_id: user_id.into(),
            scs,
            score: 0.0,
            explanation: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub game_id: String,
    pub solo_winner_member: Option<Nation>,
    pub solo_winner_user: Option<String>,
    pub dias_members: Vec<Nation>,
    pub dias_users: Vec<String>,
    pub nmr_members: Vec<Nation>,
    pub nmr_users: Vec<String>,
    pub eliminated_members: Vec<Nation>,
    pub eliminated_users: Vec<String>,
    pub all_users: Vec<String>,
    pub scores: Vec<GameScore>,
    pub rated: bool,
    /// Why rating this result failed for good; such results leave the unrated scan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unratable: Option<String>,
    pub private: bool,
    pub created_at: DateTime<Utc>,
}

impl GameResult {
    pub fn score_for_user(&self, user_id: &str) -> Option<&GameScore> {
        self.scores.iter().find(|s| s.user_id == user_id)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.all_users.iter().any(|u| u == user_id)
    }

    pub fn cursor(&self) -> ResultCursor {
        ResultCursor {
            created_at: self.created_at,
            game_id: self.game_id.clone(),
        }
    }
}

/// Position in the `(created_at, game_id)` ordering of game results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultCursor {
    pub created_at: DateTime<Utc>,
    pub game_id: String,
}

/// What the adjudication engine reports once a game ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardOutcome {
    pub supply_centers: HashMap<Province, Nation>,
    pub solo_winner: Option<Nation>,
    #[serde(default)]
    pub nmr_members: Vec<Nation>,
}

impl BoardOutcome {
    pub fn sc_count(&self, nation: &str) -> u32 {
        self.supply_centers
            .values()
            .filter(|owner| owner.as_str() == nation)
            .count() as u32
    }
}
