//! Service settings
//!
//! Loaded with the `config` crate from `TRACKING__*` environment variables,
//! e.g. `TRACKING__BIND_ADDRESS=127.0.0.1:8080`. Database and Redis
//! connection details stay with `common` (`DATABASE_URL`, `REDIS_URL`).

use chrono::Duration;
use config::{Config, ConfigError, Environment};
use engine::EngineConfig;
use engine::ingest::MAX_CLOCK_SKEW_SECS;
use engine::retry::RetryPolicy;
use serde::Deserialize;

/// Upper bound for every seconds setting (ten years)
const MAX_SECS: u64 = 10 * 365 * 24 * 3600;
const MAX_RETENTION_DAYS: u32 = 3650;
const MAX_RETRY_BASE_MS: u64 = 60_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_address: String,
    /// Minimum spacing of recorded path points
    pub polyline_interval_secs: u64,
    /// Active sessions silent for this long are closed by maintenance
    pub idle_timeout_secs: u64,
    /// How far ahead of server time a client timestamp may be
    pub max_clock_skew_secs: u64,
    pub gps_retention_days: u32,
    /// Six-field cron expression (with seconds)
    pub maintenance_schedule: String,
    pub redis_enabled: bool,
    pub live_cache_ttl_secs: u64,
    pub store_retry_attempts: u32,
    pub store_retry_base_ms: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let settings: Self = Config::builder()
            .set_default("bind_address", "0.0.0.0:3001")?
            .set_default("polyline_interval_secs", 60_i64)?
            .set_default("idle_timeout_secs", 43_200_i64)?
            .set_default("max_clock_skew_secs", MAX_CLOCK_SKEW_SECS)?
            .set_default("gps_retention_days", 30_i64)?
            .set_default("maintenance_schedule", "0 */15 * * * *")?
            .set_default("redis_enabled", false)?
            .set_default("live_cache_ttl_secs", 300_i64)?
            .set_default("store_retry_attempts", 3_i64)?
            .set_default("store_retry_base_ms", 50_i64)?
            .add_source(
                Environment::with_prefix("TRACKING")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("polyline_interval_secs", self.polyline_interval_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("max_clock_skew_secs", self.max_clock_skew_secs),
            ("live_cache_ttl_secs", self.live_cache_ttl_secs),
        ] {
            if value > MAX_SECS {
                return Err(ConfigError::Message(format!(
                    "{name} must be at most {MAX_SECS}, got {value}"
                )));
            }
        }
        if self.gps_retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Message(format!(
                "gps_retention_days must be at most {MAX_RETENTION_DAYS}, got {}",
                self.gps_retention_days
            )));
        }
        if self.store_retry_base_ms > MAX_RETRY_BASE_MS {
            return Err(ConfigError::Message(format!(
                "store_retry_base_ms must be at most {MAX_RETRY_BASE_MS}, got {}",
                self.store_retry_base_ms
            )));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            polyline_min_interval: seconds(self.polyline_interval_secs),
            max_clock_skew: seconds(self.max_clock_skew_secs),
            retry: RetryPolicy {
                max_attempts: self.store_retry_attempts.max(1),
                base_delay: std::time::Duration::from_millis(self.store_retry_base_ms),
            },
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        seconds(self.idle_timeout_secs)
    }

    pub fn gps_retention(&self) -> Duration {
        Duration::try_days(i64::from(self.gps_retention_days)).unwrap_or(Duration::MAX)
    }
}

/// Saturating conversion; `load` keeps real values far below the limit
fn seconds(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}
