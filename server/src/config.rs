//! Configuration management for the server.

use kvsync_engine::DEFAULT_MAX_KEY_LEN;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; the in-memory backend is used when absent
    pub database_url: Option<String>,
    /// Longest key accepted by the store, in bytes
    pub max_key_len: usize,
    /// Interval between heartbeat frames on the change stream
    pub heartbeat: Duration,
    /// Events buffered per subscriber before it is disconnected as lagging
    pub subscriber_buffer: usize,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            heartbeat: Duration::from_secs(15),
            subscriber_buffer: 256,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = parse_var("PORT", defaults.port)?;
        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        let max_key_len = parse_var("MAX_KEY_LEN", defaults.max_key_len)?;
        let heartbeat_secs = parse_var("HEARTBEAT_SECS", defaults.heartbeat.as_secs())?;
        let subscriber_buffer = parse_var("SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?;
        let max_body_bytes = parse_var("MAX_BODY_BYTES", defaults.max_body_bytes)?;

        if max_key_len == 0 {
            return Err(ConfigError::Invalid("MAX_KEY_LEN"));
        }
        if heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("HEARTBEAT_SECS"));
        }
        if subscriber_buffer == 0 {
            return Err(ConfigError::Invalid("SUBSCRIBER_BUFFER"));
        }

        Ok(Self {
            host,
            port,
            database_url,
            max_key_len,
            heartbeat: Duration::from_secs(heartbeat_secs),
            subscriber_buffer,
            max_body_bytes,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(config.database_url.is_none());
        assert_eq!(config.max_key_len, DEFAULT_MAX_KEY_LEN);
        assert_eq!(config.heartbeat, Duration::from_secs(15));
    }

    #[test]
    fn config_error_names_variable() {
        assert_eq!(
            ConfigError::Invalid("PORT").to_string(),
            "invalid value for PORT"
        );
    }
}
