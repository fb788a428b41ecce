use std::fmt;

use serde::Deserialize;
use servosaur_storage::ConnectionConfig;

const DEFAULT_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// PostgreSQL pool settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Seconds to wait when acquiring a connection.
    pub connect_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/servosaur".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl From<ConnectionConfig> for PostgresConfig {
    fn from(config: ConnectionConfig) -> Self {
        match config {
            ConnectionConfig::Url(database_url) => Self {
                database_url,
                ..Self::default()
            },
        }
    }
}
