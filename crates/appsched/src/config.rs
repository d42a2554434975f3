//! Scheduler and poll policy configuration loading.

#![allow(missing_docs)]

use std::path::Path;

use serde::Deserialize;

use crate::error::SchedError;
use crate::polling::AppTasks;

/// Upper bound for the inline payload buffer of every task record.
pub const MAX_DATA_SIZE_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently queued tasks (and pool slots).
    pub max_queue_size: usize,
    /// Maximum payload bytes copied into a task record.
    pub max_data_size: usize,
    /// Whether the scheduler starts in the running state.
    pub enable_on_startup: bool,
    /// Drain every triggered task per step instead of one.
    pub eager_mode: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10,
            max_data_size: 16,
            enable_on_startup: true,
            eager_mode: false,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.max_queue_size == 0 || self.max_queue_size > usize::from(u16::MAX) {
            return Err(SchedError::InvalidConfig(
                format!(
                    "scheduler.max_queue_size must be in 1..={} (got {})",
                    u16::MAX,
                    self.max_queue_size
                )
                .into(),
            ));
        }
        if self.max_data_size > MAX_DATA_SIZE_LIMIT {
            return Err(SchedError::InvalidConfig(
                format!(
                    "scheduler.max_data_size must be <= {MAX_DATA_SIZE_LIMIT} (got {})",
                    self.max_data_size
                )
                .into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Number of logical networks with independent poll state.
    pub networks: usize,
    pub long_poll_interval_ms: u32,
    pub short_poll_interval_ms: u32,
    pub wake_timeout_ms: u32,
    pub wake_timeout_bitmask: AppTasks,
    /// Consecutive poll failures that trigger the lost-parent handling.
    pub failure_limit: u8,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            networks: 1,
            long_poll_interval_ms: 5_000,
            short_poll_interval_ms: 250,
            wake_timeout_ms: 3_000,
            wake_timeout_bitmask: AppTasks::DEFAULT_WAKE_TIMEOUT,
            failure_limit: 3,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.networks == 0 {
            return Err(SchedError::InvalidConfig(
                "polling.networks must be at least 1".into(),
            ));
        }
        if self.long_poll_interval_ms == 0 {
            return Err(SchedError::InvalidConfig(
                "polling.long_poll_interval_ms must be nonzero".into(),
            ));
        }
        if self.short_poll_interval_ms == 0 {
            return Err(SchedError::InvalidConfig(
                "polling.short_poll_interval_ms must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub polling: PollConfig,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchedError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            SchedError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SchedError> {
        let raw: AppToml = toml::from_str(text)
            .map_err(|err| SchedError::InvalidConfig(err.to_string().into()))?;
        raw.into_config()
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppToml {
    #[serde(default)]
    scheduler: SchedulerToml,
    #[serde(default)]
    polling: PollingToml,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SchedulerToml {
    max_queue_size: Option<usize>,
    max_data_size: Option<usize>,
    enable_on_startup: Option<bool>,
    eager_mode: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PollingToml {
    networks: Option<usize>,
    long_poll_interval_ms: Option<u32>,
    short_poll_interval_ms: Option<u32>,
    wake_timeout_ms: Option<u32>,
    wake_timeout_bitmask: Option<u32>,
    failure_limit: Option<u32>,
}

impl AppToml {
    fn into_config(self) -> Result<AppConfig, SchedError> {
        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            max_queue_size: self
                .scheduler
                .max_queue_size
                .unwrap_or(defaults.max_queue_size),
            max_data_size: self
                .scheduler
                .max_data_size
                .unwrap_or(defaults.max_data_size),
            enable_on_startup: self
                .scheduler
                .enable_on_startup
                .unwrap_or(defaults.enable_on_startup),
            eager_mode: self.scheduler.eager_mode.unwrap_or(defaults.eager_mode),
        };
        scheduler.validate()?;

        let defaults = PollConfig::default();
        let failure_limit = match self.polling.failure_limit {
            Some(limit) => u8::try_from(limit).map_err(|_| {
                SchedError::InvalidConfig(
                    format!("polling.failure_limit must be <= 255 (got {limit})").into(),
                )
            })?,
            None => defaults.failure_limit,
        };
        let polling = PollConfig {
            networks: self.polling.networks.unwrap_or(defaults.networks),
            long_poll_interval_ms: self
                .polling
                .long_poll_interval_ms
                .unwrap_or(defaults.long_poll_interval_ms),
            short_poll_interval_ms: self
                .polling
                .short_poll_interval_ms
                .unwrap_or(defaults.short_poll_interval_ms),
            wake_timeout_ms: self
                .polling
                .wake_timeout_ms
                .unwrap_or(defaults.wake_timeout_ms),
            wake_timeout_bitmask: self
                .polling
                .wake_timeout_bitmask
                .map_or(defaults.wake_timeout_bitmask, AppTasks::from_bits),
            failure_limit,
        };
        polling.validate()?;

        Ok(AppConfig { scheduler, polling })
    }
}
