//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `TIDESYNC_BIND` is not a socket address.
    #[error("TIDESYNC_BIND is not a valid socket address: {0}")]
    InvalidBind(String),

    /// `TIDESYNC_MAX_PUSH_BATCH` is not a positive integer.
    #[error("TIDESYNC_MAX_PUSH_BATCH is not a positive integer: {0}")]
    InvalidBatch(String),
}

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// SQLite database file. `None` keeps the log in memory.
    pub database_path: Option<PathBuf>,
    /// Maximum number of transactions in one push. Larger pushes get 413.
    pub max_push_batch: usize,
    /// Time limit for pulls and bootstraps. Pushes are not cut off.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            database_path: None,
            max_push_batch: 1000,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Loads configuration from the environment.
    ///
    /// - `TIDESYNC_BIND`: socket address (default `127.0.0.1:8080`)
    /// - `TIDESYNC_DATABASE`: SQLite file (default: in memory)
    /// - `TIDESYNC_MAX_PUSH_BATCH`: push size limit (default 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("TIDESYNC_BIND") {
            config.bind_addr = bind
                .parse()
                .map_err(|_| ConfigError::InvalidBind(bind.clone()))?;
        }

        config.database_path = std::env::var("TIDESYNC_DATABASE")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        if let Ok(batch) = std::env::var("TIDESYNC_MAX_PUSH_BATCH") {
            config.max_push_batch = batch
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidBatch(batch))?;
        }

        Ok(config)
    }

    /// Sets the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Persists the log in a SQLite file.
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_push_batch, 1000);
        assert!(config.database_path.is_none());
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_database("/tmp/sync.db")
            .with_max_push_batch(50)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/sync.db")));
        assert_eq!(config.max_push_batch, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
