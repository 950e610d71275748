//! Server configuration module
//! Handles runtime configuration parameters for the collaboration hub

use crate::constants::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_HOST, DEFAULT_MESSAGE_LOG_CAPACITY,
    DEFAULT_MISSED_HEARTBEATS, DEFAULT_PORT, DEFAULT_SYNC_TIMEOUT_SECS,
    DEFAULT_WRITE_TIMEOUT_SECS,
};
use crate::error::{CollabError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "COLLAB_HUB_";

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for a single write to a connection
    pub write_timeout: Duration,
    /// How often the cleanup sweeper runs
    pub cleanup_interval: Duration,
    /// Connections that have not pinged for this long are evicted
    pub connection_timeout: Duration,
    /// Expected client heartbeat cadence
    pub heartbeat_interval: Duration,
    /// Missed heartbeats before a session is reported idle
    pub missed_heartbeats: u32,
    /// Entries kept in each document's audit log
    pub message_log_capacity: usize,
    /// Base URL of the external Sync Service (None disables it)
    pub sync_service_url: Option<String>,
    pub sync_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            missed_heartbeats: DEFAULT_MISSED_HEARTBEATS,
            message_log_capacity: DEFAULT_MESSAGE_LOG_CAPACITY,
            sync_service_url: None,
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host = env::var(format!("{}HOST", ENV_PREFIX)).unwrap_or(defaults.host);
        let port = env_or("PORT", defaults.port)?;

        let write_timeout_secs = env_or("WRITE_TIMEOUT_SECS", DEFAULT_WRITE_TIMEOUT_SECS)?;
        let cleanup_secs = env_or("CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL_SECS)?;
        let timeout_secs = env_or("CONNECTION_TIMEOUT_SECS", DEFAULT_CONNECTION_TIMEOUT_SECS)?;
        let heartbeat_secs = env_or("HEARTBEAT_INTERVAL_SECS", DEFAULT_HEARTBEAT_INTERVAL_SECS)?;
        let missed_heartbeats = env_or("MISSED_HEARTBEATS", DEFAULT_MISSED_HEARTBEATS)?;
        let message_log_capacity = env_or("MESSAGE_LOG_CAPACITY", DEFAULT_MESSAGE_LOG_CAPACITY)?;
        let sync_timeout_secs = env_or("SYNC_TIMEOUT_SECS", DEFAULT_SYNC_TIMEOUT_SECS)?;

        let sync_service_url = env::var(format!("{}SYNC_SERVICE_URL", ENV_PREFIX))
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let config = Self {
            host,
            port,
            write_timeout: Duration::from_secs(write_timeout_secs),
            cleanup_interval: Duration::from_secs(cleanup_secs),
            connection_timeout: Duration::from_secs(timeout_secs),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            missed_heartbeats,
            message_log_capacity,
            sync_service_url,
            sync_timeout: Duration::from_secs(sync_timeout_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Time without heartbeat after which a session is flagged idle
    pub fn idle_timeout(&self) -> Result<Duration> {
        self.heartbeat_interval
            .checked_mul(self.missed_heartbeats)
            .ok_or_else(|| {
                CollabError::ConfigError(format!(
                    "heartbeat interval ({}s) times missed heartbeats ({}) overflows",
                    self.heartbeat_interval.as_secs(),
                    self.missed_heartbeats
                ))
            })
    }

    /// Check that the timeouts are usable and consistent with each other
    pub fn validate(&self) -> Result<()> {
        if self.write_timeout.is_zero() {
            return Err(CollabError::ConfigError(
                "write timeout must be greater than zero".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(CollabError::ConfigError(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }
        if self.message_log_capacity == 0 {
            return Err(CollabError::ConfigError(
                "message log capacity must be greater than zero".to_string(),
            ));
        }
        let idle_timeout = self.idle_timeout()?;
        check_representable("connection timeout", self.connection_timeout)?;
        check_representable("idle timeout", idle_timeout)?;
        if idle_timeout >= self.connection_timeout {
            return Err(CollabError::ConfigError(format!(
                "idle timeout ({}s) must be shorter than the connection timeout ({}s)",
                idle_timeout.as_secs(),
                self.connection_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

/// Timeouts are compared against wall-clock timestamps, so they must fit a chrono duration
pub(crate) fn check_representable(name: &str, timeout: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(timeout)
        .map_err(|e| CollabError::ConfigError(format!("{} out of range: {}", name, e)))
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    let name = format!("{}{}", ENV_PREFIX, key);
    match env::var(&name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            CollabError::ConfigError(format!("{} has an invalid value: {}", name, value))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_timeout().unwrap(), Duration::from_secs(15));
        assert_eq!(config.connection_timeout, Duration::from_secs(300));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_idle_timeout_must_be_shorter_than_eviction() {
        let config = ServerConfig {
            connection_timeout: Duration::from_secs(10),
            ..ServerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idle timeout"));
    }

    #[test]
    fn test_idle_timeout_overflow_is_rejected() {
        let config = ServerConfig {
            heartbeat_interval: Duration::from_secs(u64::MAX),
            ..ServerConfig::default()
        };
        assert!(config.idle_timeout().is_err());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_unrepresentable_connection_timeout_is_rejected() {
        let config = ServerConfig {
            connection_timeout: Duration::from_secs(u64::MAX),
            ..ServerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connection timeout out of range"));
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        env::set_var("COLLAB_HUB_MISSED_HEARTBEATS", "many");
        let result = ServerConfig::from_env();
        env::remove_var("COLLAB_HUB_MISSED_HEARTBEATS");

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("MISSED_HEARTBEATS"));
    }
}
