use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::Nation;

/// Glicko-style rating parameters on the public (1500-centred) scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

impl Rating {
    pub fn new(rating: f64, deviation: f64, volatility: f64) -> Self {
        Self {
            rating,
            deviation,
            volatility,
        }
    }

    /// Conservative estimate used for leaderboards
    pub fn practical(&self) -> f64 {
        self.rating - 2.0 * self.deviation
    }
}

/// One user's rating after one game. Snapshots are append-only; the newest by
/// `created_at` is the user's current rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSnapshot {
    /// Empty for the synthesized default of a user who has never been rated
    pub game_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub member: Nation,
    pub rating: f64,
    pub practical_rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

impl RatingSnapshot {
    pub fn new(
        game_id: impl Into<String>,
        user_id: impl Into<String>,
        member: impl Into<Nation>,
        created_at: DateTime<Utc>,
        rating: Rating,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            user_id: user_id.into(),
            created_at,
            member: member.into(),
            rating: rating.rating,
            practical_rating: rating.practical(),
            deviation: rating.deviation,
            volatility: rating.volatility,
        }
    }

    pub fn default_for(user_id: impl Into<String>, rating: Rating) -> Self {
        Self::new("", user_id, "", Utc::now(), rating)
    }

    pub fn parameters(&self) -> Rating {
        Rating::new(self.rating, self.deviation, self.volatility)
    }

    pub fn is_default(&self) -> bool {
        self.game_id.is_empty()
    }
}
