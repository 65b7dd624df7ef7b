//! Configuration for focus-telemetry.
//!
//! One JSON file holds the client session settings, the delivery target,
//! the aggregation server settings and the feedback providers. Missing
//! fields fall back to defaults, and CLI flags override what is loaded.

use crate::core::SessionSettings;
use crate::delivery::DeliveryConfig;
use crate::feedback::FeedbackConfig;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Subject the client reports for
    pub subject_id: u64,

    /// Sampling and windowing
    pub session: SessionConfig,

    /// Where window records and summaries are sent
    pub delivery: DeliveryConfig,

    /// Aggregation server settings
    pub server: ServerSettings,

    /// Feedback providers and retry policy
    pub feedback: FeedbackConfig,

    /// Path for the delivery ledger and other local state
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("focus-telemetry");

        Self {
            subject_id: 1,
            session: SessionConfig::default(),
            delivery: DeliveryConfig::default(),
            server: ServerSettings::with_data_dir(&data_dir),
            feedback: FeedbackConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("focus-telemetry")
            .join("config.json")
    }

    /// Ensure the local data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Path of the persisted delivery ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_path.join("ledger.json")
    }

    /// Copy for display, with inline provider keys masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for provider in &mut config.feedback.providers {
            if provider.api_key.is_some() {
                provider.api_key = Some(REDACTED.to_string());
            }
        }
        config
    }
}

const REDACTED: &str = "********";

/// Sampling and windowing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Samples (seconds) per window
    pub window_seconds: usize,
    /// Time between samples
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,
    /// Consecutive read failures that end a session
    pub max_read_failures: u32,
    /// Upper bound on a single window delivery
    #[serde(with = "duration_secs")]
    pub delivery_ceiling: Duration,
    /// Upper bound on the end-of-session summary delivery
    #[serde(with = "duration_secs")]
    pub summary_ceiling: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = SessionSettings::default();
        Self {
            window_seconds: defaults.window_size.get(),
            tick_interval: defaults.tick_interval,
            max_read_failures: defaults.max_read_failures,
            delivery_ceiling: defaults.delivery_ceiling,
            summary_ceiling: defaults.summary_ceiling,
        }
    }
}

impl SessionConfig {
    /// Validate and convert into controller settings.
    pub fn to_settings(&self) -> Result<SessionSettings, ConfigError> {
        let window_size = NonZeroUsize::new(self.window_seconds)
            .ok_or_else(|| ConfigError::Invalid("window_seconds must be at least 1".to_string()))?;

        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick_interval must be greater than zero".to_string(),
            ));
        }
        if self.max_read_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_read_failures must be at least 1".to_string(),
            ));
        }

        Ok(SessionSettings {
            window_size,
            tick_interval: self.tick_interval,
            max_read_failures: self.max_read_failures,
            delivery_ceiling: self.delivery_ceiling,
            summary_ceiling: self.summary_ceiling,
        })
    }
}

/// Aggregation server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// SQLite database file
    pub database_path: PathBuf,
    /// IANA timezone that defines a report's calendar date
    pub timezone: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::with_data_dir(&PathBuf::from("."))
    }
}

impl ServerSettings {
    fn with_data_dir(data_dir: &std::path::Path) -> Self {
        Self {
            port: 8000,
            database_path: data_dir.join("focus-telemetry.db"),
            timezone: "UTC".to_string(),
        }
    }

    /// Parse the configured report timezone.
    pub fn report_timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| ConfigError::Invalid(format!("unknown timezone '{}': {e}", self.timezone)))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
