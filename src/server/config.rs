//! Server configuration.

use crate::storage::DEFAULT_MAX_MEMORY_MB;
use crate::{DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_CLIENTS, DEFAULT_PORT};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Connections served at the same time
    pub max_clients: usize,
    /// Store memory budget in megabytes
    pub max_memory_mb: usize,
    /// A connection with no complete request for this long is dropped
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
