use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CronhookError, Result};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BIND: &str = "127.0.0.1";

// Scheduler defaults. All durations are milliseconds.
pub const TICK_INTERVAL_MS: u64 = 1_000;
pub const CACHE_TTL_MS: u64 = 5_000;
pub const MAX_CONCURRENT: usize = 50;
pub const MIN_SPACING_MS: u64 = 1_000;
pub const INTERVAL_TOLERANCE_MS: u64 = 500;
pub const IRREGULAR_MIN_GAP_MS: u64 = 1_000;
pub const IRREGULAR_FORCE_AFTER_MS: u64 = 60_000;
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const PRUNE_THRESHOLD: usize = 2_000;
pub const PRUNE_MAX_AGE_MS: u64 = 300_000; // 5 minutes
pub const ALERT_WINDOW: usize = 5;
pub const ALERT_THRESHOLD: usize = 3;
pub const RECORDER_QUEUE: usize = 1_024;
pub const RECORDER_CONCURRENCY: usize = 16;

/// Top-level config (cronhook.toml + CRONHOOK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronhookConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Tunables of the scheduling/dispatch engine.
///
/// Every field has a default, so a partial `[scheduler]` table (or none at
/// all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the scheduling tick.
    pub tick_interval_ms: u64,
    /// How long a snapshot of active jobs is served before re-querying the store.
    pub cache_ttl_ms: u64,
    /// Ceiling on concurrently in-flight executions.
    pub max_concurrent: usize,
    /// Minimum gap between two dispatches of the same job.
    pub min_spacing_ms: u64,
    /// Fixed-interval jobs become due this much before the interval elapses.
    pub interval_tolerance_ms: u64,
    /// Minimum gap between dispatches of an irregular-cadence job.
    pub irregular_min_gap_ms: u64,
    /// An irregular job is forced due once this much time has passed.
    pub irregular_force_after_ms: u64,
    /// Hard timeout on the outbound HTTP call.
    pub request_timeout_ms: u64,
    /// Timing entries tracked before pruning kicks in.
    pub prune_threshold: usize,
    /// Entries whose last dispatch is older than this are pruned.
    pub prune_max_age_ms: u64,
    /// Number of recent executions inspected by the failure alerter.
    pub alert_window: usize,
    /// Failures within the window that trigger a critical escalation.
    pub alert_threshold: usize,
    /// Capacity of the recorder hand-off channel.
    pub recorder_queue: usize,
    /// Recorder writes allowed to run at once.
    pub recorder_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_INTERVAL_MS,
            cache_ttl_ms: CACHE_TTL_MS,
            max_concurrent: MAX_CONCURRENT,
            min_spacing_ms: MIN_SPACING_MS,
            interval_tolerance_ms: INTERVAL_TOLERANCE_MS,
            irregular_min_gap_ms: IRREGULAR_MIN_GAP_MS,
            irregular_force_after_ms: IRREGULAR_FORCE_AFTER_MS,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            prune_threshold: PRUNE_THRESHOLD,
            prune_max_age_ms: PRUNE_MAX_AGE_MS,
            alert_window: ALERT_WINDOW,
            alert_threshold: ALERT_THRESHOLD,
            recorder_queue: RECORDER_QUEUE,
            recorder_concurrency: RECORDER_CONCURRENCY,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject settings that would stall the engine outright.
    pub fn validate(&self) -> Result<()> {
        let nonzero: [(&'static str, u64); 5] = [
            ("scheduler.tick_interval_ms", self.tick_interval_ms),
            ("scheduler.max_concurrent", self.max_concurrent as u64),
            ("scheduler.request_timeout_ms", self.request_timeout_ms),
            ("scheduler.recorder_queue", self.recorder_queue as u64),
            (
                "scheduler.recorder_concurrency",
                self.recorder_concurrency as u64,
            ),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(CronhookError::InvalidSetting {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.alert_threshold > self.alert_window {
            return Err(CronhookError::InvalidSetting {
                key: "scheduler.alert_threshold",
                reason: format!(
                    "{} exceeds alert_window {}",
                    self.alert_threshold, self.alert_window
                ),
            });
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronhook/cronhook.db", home)
}

impl CronhookConfig {
    /// Load config from a TOML file with CRONHOOK_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CRONHOOK_SCHEDULER__MAX_CONCURRENT=20`. A missing file is not an
    /// error; defaults fill every absent field.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CronhookConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONHOOK_").split("__"))
            .extract()
            .map_err(|e| CronhookError::Config(e.to_string()))?;

        config.scheduler.validate()?;
        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronhook/cronhook.toml", home)
}
