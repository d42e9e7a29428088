// Call configuration.
// Logging is on by default only in debug builds.

use crate::error::ConfigError;
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Default filter directive when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "callsession=debug,webrtc=warn";

/// How long a caller waits for an answer before giving up
pub const RING_TIMEOUT: Duration = Duration::from_secs(30);

/// Ringing calls older than this are considered abandoned
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// Session documents expire this long after creation
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Период ожидания перед принудительным отключением
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CallConfig {
    pub ring_timeout_secs: u64,
    pub stale_after_secs: u64,
    pub retention_secs: u64,
    pub disconnect_grace_secs: u64,
    pub ice_servers: Vec<ServerConfig>,
    pub logging: LoggingConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: RING_TIMEOUT.as_secs(),
            stale_after_secs: STALE_AFTER.as_secs(),
            retention_secs: RETENTION.as_secs(),
            disconnect_grace_secs: GRACE_PERIOD.as_secs(),
            ice_servers: crate::peer::ice::default_servers(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CallConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_timeout_secs == 0 {
            return Err(ConfigError::Invalid("ring_timeout_secs must be > 0".into()));
        }
        if self.disconnect_grace_secs == 0 {
            return Err(ConfigError::Invalid("disconnect_grace_secs must be > 0".into()));
        }
        if self.stale_after_secs == 0 {
            return Err(ConfigError::Invalid("stale_after_secs must be > 0".into()));
        }
        if self.retention_secs < self.stale_after_secs {
            return Err(ConfigError::Invalid(
                "retention_secs must not be shorter than stale_after_secs".into(),
            ));
        }
        crate::peer::ice::validate_servers(&self.ice_servers)
            .map_err(ConfigError::Invalid)
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_windows() {
        let config = CallConfig::default();
        assert_eq!(config.ring_timeout(), Duration::from_secs(30));
        assert_eq!(config.stale_after(), Duration::from_secs(60));
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = CallConfig::from_json_str(r#"{"ring_timeout_secs": 45}"#).unwrap();
        assert_eq!(config.ring_timeout_secs, 45);
        assert_eq!(config.stale_after_secs, 60);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        for raw in [
            r#"{"ring_timeout_secs": 0}"#,
            r#"{"stale_after_secs": 0}"#,
            r#"{"disconnect_grace_secs": 0}"#,
        ] {
            let err = CallConfig::from_json_str(raw).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{raw} was accepted");
        }
    }

    #[test]
    fn turn_server_without_credentials_is_rejected() {
        let raw = r#"{"ice_servers": [{"id": "t1", "type": "turn", "url": "turn.example.org:3478"}]}"#;
        let err = CallConfig::from_json_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"retention_secs": 3600, "logging": {{"enabled": true}}}}"#).unwrap();
        let config = CallConfig::from_file(file.path()).unwrap();
        assert_eq!(config.retention(), Duration::from_secs(3600));
        assert!(config.logging.enabled);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
    }
}
