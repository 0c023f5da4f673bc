pub mod loader;

pub use loader::{ConfigLoader, ConfigSource, EnvConfigSource, Freshness, StaticConfigSource};

use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::queue::WorkerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration source failed: {0}")]
    Source(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingConfig {
    /// How often the rating scan is enqueued
    pub scan_interval: Duration,
    /// Delay between settling a game and rating it
    pub settle_delay: Duration,
    /// Glicko-2 system constant
    pub tau: f64,
    pub initial_rating: f64,
    pub initial_deviation: f64,
    pub initial_volatility: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10 * 60), // 10 minutes
            settle_delay: Duration::from_secs(60),
            tau: 0.5,
            initial_rating: 1500.0,
            initial_deviation: 350.0,
            initial_volatility: 0.06,
        }
    }
}

/// Which of a user's devices get a message notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryPolicy {
    AllDevices,
    /// Stop after the first device a push was enqueued for
    FirstDevice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    pub policy: DeliveryPolicy,
    /// Message bodies longer than this many characters are truncated
    pub body_limit: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            policy: DeliveryPolicy::AllDevices,
            body_limit: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsConfig {
    /// Delay before a requested recomputation runs
    pub delay: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettlementConfig {
    pub worker: WorkerConfig,
    pub rating: RatingConfig,
    pub notifications: NotificationConfig,
    pub stats: StatsConfig,
    pub http: HttpConfig,
    /// In-memory storage when unset
    pub database_url: Option<String>,
    /// Reload interval for components that re-read configuration
    pub reload_ttl: Option<Duration>,
}
