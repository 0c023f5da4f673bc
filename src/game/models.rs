use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Member nation identifier, e.g. "Austria".
pub type Nation = String;

/// Board province name, e.g. "vie".
pub type Province = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    pub nation: Nation,
    /// Nations whose messages this member does not want to be notified about
    #[serde(default)]
    pub muted: Vec<Nation>,
}

impl Member {
    pub fn new(user_id: impl Into<String>, nation: impl Into<Nation>) -> Self {
        Self {
            user_id: user_id.into(),
            nation: nation.into(),
            muted: Vec::new(),
        }
    }

    pub fn has_muted(&self, nation: &str) -> bool {
        self.muted.iter().any(|n| n == nation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub desc: String,
    pub variant: String,
    pub private: bool,
    pub started: bool,
    pub finished: bool,
    pub members: Vec<Member>,
    pub created_at: DateTime<Utc>,
}

impl Game {
    pub fn new(id: impl Into<String>, desc: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            id: id.into(),
            desc: desc.into(),
            variant: "Classical".to_string(),
            private: false,
            started: true,
            finished: false,
            members,
            created_at: Utc::now(),
        }
    }

    pub fn member_by_user(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn member_by_nation(&self, nation: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.nation == nation)
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.member_by_user(user_id).is_some()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.user_id.clone()).collect()
    }

    /// Three-letter abbreviation used in notification titles
    pub fn abbreviate(nation: &str) -> String {
        nation.chars().take(3).collect()
    }
}
