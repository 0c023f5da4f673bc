use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ConfigError, SettlementConfig};

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<SettlementConfig, ConfigError>;
}

/// Reads `SETTLEMENT_*` variables (and `DATABASE_URL`) over the defaults.
#[derive(Debug, Default)]
pub struct EnvConfigSource {
    overrides: Option<HashMap<String, String>>,
}

impl EnvConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks variables up in `vars` instead of the process environment
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self {
            overrides: Some(vars),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        match &self.overrides {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
        .filter(|v| !v.trim().is_empty())
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.var(key)
            .map(|value| {
                value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                    key: key.to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_millis))
    }

    fn secs(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_secs))
    }
}

#[async_trait]
impl ConfigSource for EnvConfigSource {
    async fn load(&self) -> Result<SettlementConfig, ConfigError> {
        let mut config = SettlementConfig::default();

        config.database_url = self.var("DATABASE_URL");
        if let Some(addr) = self.var("SETTLEMENT_HTTP_ADDR") {
            config.http.addr = addr;
        }

        let worker = &mut config.worker;
        if let Some(attempts) = self.parsed::<u32>("SETTLEMENT_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(ConfigError::Invalid {
                    key: "SETTLEMENT_MAX_ATTEMPTS".to_string(),
                    value: attempts.to_string(),
                    reason: "at least one attempt is required".to_string(),
                });
            }
            worker.max_attempts = attempts;
        }
        if let Some(backoff) = self.millis("SETTLEMENT_BASE_BACKOFF_MS")? {
            worker.base_backoff = backoff;
        }
        if let Some(timeout) = self.millis("SETTLEMENT_HANDLER_TIMEOUT_MS")? {
            worker.handler_timeout = timeout;
        }
        if let Some(poll) = self.millis("SETTLEMENT_POLL_INTERVAL_MS")? {
            worker.poll_interval = poll;
        }
        if let Some(lease) = self.millis("SETTLEMENT_LEASE_MS")? {
            worker.lease_duration = lease;
        }

        if let Some(interval) = self.secs("SETTLEMENT_RATING_SCAN_SECS")? {
            config.rating.scan_interval = interval;
        }
        if let Some(delay) = self.secs("SETTLEMENT_RATING_DELAY_SECS")? {
            config.rating.settle_delay = delay;
        }
        if let Some(tau) = self.parsed::<f64>("SETTLEMENT_GLICKO_TAU")? {
            if !(tau > 0.0 && tau.is_finite()) {
                return Err(ConfigError::Invalid {
                    key: "SETTLEMENT_GLICKO_TAU".to_string(),
                    value: tau.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            config.rating.tau = tau;
        }

        if let Some(delay) = self.secs("SETTLEMENT_STATS_DELAY_SECS")? {
            config.stats.delay = delay;
        }

        if let Some(policy) = self.parsed("SETTLEMENT_NOTIFY_POLICY")? {
            config.notifications.policy = policy;
        }
        if let Some(limit) = self.parsed::<usize>("SETTLEMENT_NOTIFY_BODY_LIMIT")? {
            config.notifications.body_limit = limit;
        }

        config.reload_ttl = self.secs("SETTLEMENT_CONFIG_TTL_SECS")?;

        debug!(
            http_addr = %config.http.addr,
            postgres = config.database_url.is_some(),
            "Loaded configuration from environment"
        );
        Ok(config)
    }
}

/// Always yields the same configuration
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    config: SettlementConfig,
}

impl StaticConfigSource {
    pub fn new(config: SettlementConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<SettlementConfig, ConfigError> {
        Ok(self.config.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Load once for the lifetime of the loader
    Once,
    /// Reload when the cached copy is older than this
    Ttl(Duration),
}

/// Caching front for a [`ConfigSource`], shared between components as an `Arc`.
pub struct ConfigLoader {
    source: Box<dyn ConfigSource>,
    freshness: Freshness,
    cache: RwLock<Option<(Instant, Arc<SettlementConfig>)>>,
}

impl ConfigLoader {
    pub fn new(source: impl ConfigSource + 'static, freshness: Freshness) -> Self {
        Self {
            source: Box::new(source),
            freshness,
            cache: RwLock::new(None),
        }
    }

    pub fn fixed(config: SettlementConfig) -> Self {
        Self::new(StaticConfigSource::new(config), Freshness::Once)
    }

    pub async fn get(&self) -> Result<Arc<SettlementConfig>, ConfigError> {
        if let Some((loaded_at, config)) = self.cache.read().await.as_ref() {
            if self.is_fresh(*loaded_at) {
                return Ok(Arc::clone(config));
            }
        }

        let mut cache = self.cache.write().await;
        // Someone else may have reloaded while we waited for the lock
        if let Some((loaded_at, config)) = cache.as_ref() {
            if self.is_fresh(*loaded_at) {
                return Ok(Arc::clone(config));
            }
        }

        match self.source.load().await {
            Ok(config) => {
                let config = Arc::new(config);
                *cache = Some((Instant::now(), Arc::clone(&config)));
                info!(freshness = ?self.freshness, "Configuration loaded");
                Ok(config)
            }
            Err(e) => match cache.as_ref() {
                Some((_, stale)) => {
                    warn!(error = %e, "Configuration reload failed, keeping previous values");
                    Ok(Arc::clone(stale))
                }
                None => Err(e),
            },
        }
    }

    fn is_fresh(&self, loaded_at: Instant) -> bool {
        match self.freshness {
            Freshness::Once => true,
            Freshness::Ttl(ttl) => loaded_at.elapsed() < ttl,
        }
    }
}
