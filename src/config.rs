//! Configuration for the dwell tracker.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default base heartbeat interval in milliseconds, used when no override
/// is configured or the override falls outside the accepted range.
pub const DEFAULT_BASE_INTERVAL_MS: u64 = 10_500;

/// Smallest accepted heartbeat override, in whole seconds.
pub const MIN_HEARTBEAT_SECS: u64 = 1;

/// Largest accepted heartbeat override, in whole seconds.
pub const MAX_HEARTBEAT_SECS: u64 = 15;

/// Main configuration for a tracker instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Site identifier stamped onto every event
    pub site_id: String,

    /// Optional override for the base interval between heartbeats, in
    /// whole seconds. Values outside 1..=15 are ignored.
    pub seconds_between_heartbeats: Option<u64>,

    /// How often queued events are flushed to the transport
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,

    /// Maximum number of events delivered per batch (0 = no limit)
    pub batch_size: usize,

    /// Endpoint for batch delivery; None keeps events local
    pub endpoint: Option<String>,

    /// Path for persisting the visitor identity between runs
    pub visitor_store: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dwell-tracker");

        Self {
            site_id: String::new(),
            seconds_between_heartbeats: None,
            flush_interval: Duration::from_secs(30),
            batch_size: 0,
            endpoint: None,
            visitor_store: Some(data_dir.join("visitor.json")),
        }
    }
}

impl TrackerConfig {
    /// Create a configuration for the given site with everything else defaulted.
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: TrackerConfig = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dwell-tracker")
            .join("config.json")
    }

    /// Base heartbeat interval in milliseconds after applying the
    /// accepted range to any configured override.
    ///
    /// An override of `n` seconds is honored only for 1 <= n <= 15;
    /// anything else falls back to [`DEFAULT_BASE_INTERVAL_MS`].
    pub fn base_interval_ms(&self) -> u64 {
        match self.seconds_between_heartbeats {
            Some(secs) if (MIN_HEARTBEAT_SECS..=MAX_HEARTBEAT_SECS).contains(&secs) => secs * 1000,
            _ => DEFAULT_BASE_INTERVAL_MS,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
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

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert!(config.site_id.is_empty());
        assert_eq!(config.seconds_between_heartbeats, None);
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 0);
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn test_base_interval_defaults_when_unset() {
        let config = TrackerConfig::new("example.com");
        assert_eq!(config.base_interval_ms(), DEFAULT_BASE_INTERVAL_MS);
    }

    #[test]
    fn test_base_interval_honors_in_range_override() {
        let mut config = TrackerConfig::new("example.com");

        config.seconds_between_heartbeats = Some(1);
        assert_eq!(config.base_interval_ms(), 1000);

        config.seconds_between_heartbeats = Some(7);
        assert_eq!(config.base_interval_ms(), 7000);

        config.seconds_between_heartbeats = Some(15);
        assert_eq!(config.base_interval_ms(), 15_000);
    }

    #[test]
    fn test_base_interval_rejects_out_of_range_override() {
        let mut config = TrackerConfig::new("example.com");

        config.seconds_between_heartbeats = Some(0);
        assert_eq!(config.base_interval_ms(), DEFAULT_BASE_INTERVAL_MS);

        config.seconds_between_heartbeats = Some(16);
        assert_eq!(config.base_interval_ms(), DEFAULT_BASE_INTERVAL_MS);

        config.seconds_between_heartbeats = Some(3600);
        assert_eq!(config.base_interval_ms(), DEFAULT_BASE_INTERVAL_MS);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let mut config = TrackerConfig::new("example.com");
        config.seconds_between_heartbeats = Some(5);
        config.endpoint = Some("https://metrics.example.com/batch".to_string());

        let json = serde_json::to_string(&config).unwrap();
        let restored: TrackerConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.site_id, "example.com");
        assert_eq!(restored.seconds_between_heartbeats, Some(5));
        assert_eq!(restored.flush_interval, config.flush_interval);
        assert_eq!(restored.endpoint, config.endpoint);
    }

    #[test]
    fn test_config_round_trips_through_disk() {
        let path = std::env::temp_dir()
            .join("dwell-config-test")
            .join(format!("{}.json", Uuid::new_v4()));

        let mut config = TrackerConfig::new("example.com");
        config.seconds_between_heartbeats = Some(5);
        config.batch_size = 25;
        config.save_to(&path).unwrap();

        let restored = TrackerConfig::load_from(&path).unwrap();
        assert_eq!(restored.site_id, "example.com");
        assert_eq!(restored.seconds_between_heartbeats, Some(5));
        assert_eq!(restored.batch_size, 25);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir()
            .join("dwell-config-test")
            .join(format!("{}.json", Uuid::new_v4()));

        let config = TrackerConfig::load_from(&path).unwrap();
        assert!(config.site_id.is_empty());
        assert_eq!(config.flush_interval, Duration::from_secs(30));
    }
}
