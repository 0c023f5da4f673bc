use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use super::QueueError;

/// Every kind of asynchronous work the settlement pipeline schedules.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    UpdateRatings,
    Rerate,
    UpdateUserStats,
    NotifyUsers,
    NotifyDevices,
    DeliverPush,
    DeliverMail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    /// The task is not leased before this instant
    pub not_before: DateTime<Utc>,
    /// Number of failed attempts so far
    pub attempt: u32,
}

impl Task {
    pub fn new<P: Serialize>(kind: TaskKind, payload: &P) -> Result<Self, QueueError> {
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            payload: serde_json::to_value(payload)?,
            not_before: Utc::now(),
            attempt: 0,
        })
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.not_before = Utc::now() + to_chrono(delay);
        self
    }

    pub fn payload<P: DeserializeOwned>(&self) -> Result<P, QueueError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
