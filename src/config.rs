use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Capacity of the broadcast stream behind `EventBus::subscribe`.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(default)]
    pub status_refresh: StatusRefreshConfig,

    /// Run cleanup actions of different providers concurrently.
    #[serde(default = "default_true")]
    pub parallel_cleanup: bool,

    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_refresh_interval", with = "duration_ms")]
    pub interval: Duration,
}

impl Default for StatusRefreshConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval: default_refresh_interval(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            status_refresh: StatusRefreshConfig::default(),
            parallel_cleanup: default_true(),
            log_filter: default_log_filter(),
        }
    }
}

impl SystemConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config: Self = from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> ConfigResult<Self> {
        let config: Self = from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.event_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.status_refresh.enabled && self.status_refresh.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "status_refresh.interval must be greater than 0 when enabled".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ConfigResult<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ConfigResult<T> {
    let config = serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(config)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn default_event_buffer_size() -> usize {
    1000
}
fn default_refresh_interval() -> Duration {
    Duration::from_millis(5000)
}
fn default_log_filter() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = SystemConfig::from_str("{}").unwrap();
        assert_eq!(config, SystemConfig::default());
        assert_eq!(config.event_buffer_size, 1000);
        assert_eq!(config.status_refresh.interval, Duration::from_millis(5000));
        assert!(config.parallel_cleanup);
    }

    #[test]
    fn test_interval_in_millis() {
        let config =
            SystemConfig::from_str(r#"{"status_refresh": {"interval": 250}, "log_filter": "debug"}"#)
                .unwrap();
        assert!(config.status_refresh.enabled);
        assert_eq!(config.status_refresh.interval, Duration::from_millis(250));
        assert_eq!(config.log_filter, "debug");

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["status_refresh"]["interval"], 250);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            SystemConfig::from_str(r#"{"event_buffer_size": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SystemConfig::from_str(r#"{"status_refresh": {"interval": 0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(SystemConfig::from_str(r#"{"status_refresh": {"enabled": false, "interval": 0}}"#).is_ok());
        assert!(matches!(
            SystemConfig::from_str("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"parallel_cleanup": false}}"#).unwrap();

        let config = SystemConfig::from_file(file.path()).unwrap();
        assert!(!config.parallel_cleanup);

        assert!(matches!(
            SystemConfig::from_file("/nonexistent/drydock.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
