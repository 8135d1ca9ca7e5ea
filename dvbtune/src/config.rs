//! Tuner timing configuration.
//!
//! Values come from, in increasing priority:
//! 1. Built-in defaults
//! 2. The `[tuner]` table of a TOML file
//! 3. Environment variables (`DVBTUNE_*`)

use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while loading the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Timing constants for tuning, filtering and reading.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Per-iteration poll timeout of the lock loop.
    pub fe_poll_timeout_ms: u64,
    /// Consecutive locked iterations required before a lock is accepted.
    pub lock_success_count: u32,
    /// Back-off before reporting a not-locked read or a DVR error.
    pub error_retry_interval_ms: u64,
    /// Settle delay after a stop.
    pub stop_delay_ms: u64,
    /// Poll timeout used by session reads.
    pub read_timeout_ms: u64,
    /// Lock budget for 8VSB tunes.
    pub vsb_tune_timeout_ms: u64,
    /// Lock budget for QAM tunes. Some devices are slow on QAM256.
    pub qam_tune_timeout_ms: u64,
    /// Lock budget for satellite tunes.
    pub dvb_tune_timeout_ms: u64,
    /// Upper bound on stale frontend events discarded before a satellite tune.
    pub max_stale_events: u32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            fe_poll_timeout_ms: 100,
            lock_success_count: 1,
            error_retry_interval_ms: 100,
            stop_delay_ms: 100,
            read_timeout_ms: 100,
            vsb_tune_timeout_ms: 2000,
            qam_tune_timeout_ms: 4000,
            dvb_tune_timeout_ms: 8000,
            max_stale_events: 64,
        }
    }
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    tuner: TunerConfig,
}

impl TunerConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        Ok(file.tuner)
    }

    /// Load a configuration file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env();
        debug!("[Config] Loaded {:?}: {:?}", path, config);
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `DVBTUNE_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(name: &str, value: Option<String>, field: &mut T) {
            if let Some(value) = value {
                match value.trim().parse() {
                    Ok(v) => *field = v,
                    Err(_) => warn!("[Config] Ignoring {}={:?}: not a number", name, value),
                }
            }
        }

        macro_rules! env_field {
            ($field:ident, $var:literal) => {
                parse($var, get($var), &mut self.$field)
            };
        }

        env_field!(fe_poll_timeout_ms, "DVBTUNE_FE_POLL_TIMEOUT_MS");
        env_field!(lock_success_count, "DVBTUNE_LOCK_SUCCESS_COUNT");
        env_field!(error_retry_interval_ms, "DVBTUNE_ERROR_RETRY_INTERVAL_MS");
        env_field!(stop_delay_ms, "DVBTUNE_STOP_DELAY_MS");
        env_field!(read_timeout_ms, "DVBTUNE_READ_TIMEOUT_MS");
        env_field!(vsb_tune_timeout_ms, "DVBTUNE_VSB_TUNE_TIMEOUT_MS");
        env_field!(qam_tune_timeout_ms, "DVBTUNE_QAM_TUNE_TIMEOUT_MS");
        env_field!(dvb_tune_timeout_ms, "DVBTUNE_DVB_TUNE_TIMEOUT_MS");
        env_field!(max_stale_events, "DVBTUNE_MAX_STALE_EVENTS");
    }

    pub fn fe_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.fe_poll_timeout_ms)
    }

    pub fn error_retry_interval(&self) -> Duration {
        Duration::from_millis(self.error_retry_interval_ms)
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Streak length, never below one.
    pub fn lock_streak(&self) -> u32 {
        self.lock_success_count.max(1)
    }
}
