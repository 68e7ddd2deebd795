//! Configuration management with validation and defaults
//!
//! Settings are read from an optional TOML file, then overridden from
//! `JACKPOT_*` environment variables, then validated.

use crate::errors::{ConfigurationError, JackpotResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Complete coordinator configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JackpotConfig {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Quiet-period countdown settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Quiet period before a round auto-resolves
    pub duration_ms: u64,
    /// Cadence of `timer-update` broadcasts
    pub tick_interval_ms: u64,
    /// Watchdog fires this long after the nominal end time
    pub watchdog_grace_ms: u64,
    /// Timer markers outlive the countdown by this much
    pub marker_ttl_buffer_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            duration_ms: 20_000,
            tick_interval_ms: 1_000,
            watchdog_grace_ms: 1_000,
            marker_ttl_buffer_secs: 30,
        }
    }
}

impl TimerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn watchdog_grace(&self) -> Duration {
        Duration::from_millis(self.watchdog_grace_ms)
    }

    /// TTL for the started marker and the persisted timer state
    pub fn marker_ttl_secs(&self, duration_ms: u64) -> u64 {
        duration_ms.div_ceil(1000) + self.marker_ttl_buffer_secs
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL of round snapshots, players and the current-round pointer
    pub round_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            round_ttl_secs: 60 * 60 * 24,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub global_channel: String,
    pub round_channel_prefix: String,
    /// Buffer of the in-process broadcast notifier
    pub capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            global_channel: "jackpot-game".to_string(),
            round_channel_prefix: "game-".to_string(),
            capacity: 1024,
        }
    }
}

impl NotifierConfig {
    pub fn round_channel(&self, round_address: &str) -> String {
        format!("{}{}", self.round_channel_prefix, round_address)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub data_directory: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/jackpot_history".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> JackpotResult<JackpotConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => JackpotConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> JackpotResult<JackpotConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut JackpotConfig) -> JackpotResult<()> {
        if let Some(duration) = parse_env_u64("JACKPOT_TIMER_DURATION_MS")? {
            config.timer.duration_ms = duration;
        }
        if let Some(tick) = parse_env_u64("JACKPOT_TIMER_TICK_MS")? {
            config.timer.tick_interval_ms = tick;
        }
        if let Some(ttl) = parse_env_u64("JACKPOT_ROUND_TTL_SECS")? {
            config.cache.round_ttl_secs = ttl;
        }
        if let Ok(dir) = env::var("JACKPOT_HISTORY_DIR") {
            config.history.data_directory = dir;
        }
        if let Ok(channel) = env::var("JACKPOT_GLOBAL_CHANNEL") {
            config.notifier.global_channel = channel;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &JackpotConfig) -> JackpotResult<()> {
        let positive = [
            ("timer.duration_ms", config.timer.duration_ms),
            ("timer.tick_interval_ms", config.timer.tick_interval_ms),
            ("timer.watchdog_grace_ms", config.timer.watchdog_grace_ms),
            ("timer.marker_ttl_buffer_secs", config.timer.marker_ttl_buffer_secs),
            ("cache.round_ttl_secs", config.cache.round_ttl_secs),
            ("notifier.capacity", config.notifier.capacity as u64),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "Value must be greater than zero".to_string(),
                }
                .into());
            }
        }

        if config.notifier.global_channel.is_empty() {
            return Err(ConfigurationError::MissingRequired("notifier.global_channel".to_string()).into());
        }

        if config.history.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("history.data_directory".to_string()).into());
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &JackpotConfig, path: &str) -> JackpotResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn parse_env_u64(name: &str) -> JackpotResult<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| {
                ConfigurationError::InvalidValue {
                    field: name.to_string(),
                    value: raw,
                    reason: "Expected an unsigned integer".to_string(),
                }
                .into()
            }),
        Err(_) => Ok(None),
    }
}
