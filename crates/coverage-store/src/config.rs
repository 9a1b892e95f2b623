//! Configuration for the store connection.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use coverage_common::{CatalogError, CatalogResult};

use crate::{DataConnection, MemoryConnection, PostgresConnection, RemoteConnection};

/// Which backend serves catalog rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// In-process PostgreSQL pool.
    Postgres,
    /// Remote catalog service over HTTP.
    Remote,
    /// In-memory store (tests, embedding).
    Memory,
}

impl ConnectionMode {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "remote" => Self::Remote,
            "memory" => Self::Memory,
            _ => Self::Postgres,
        }
    }
}

/// Store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Backend selection.
    pub mode: ConnectionMode,

    /// Database URL for [`ConnectionMode::Postgres`].
    pub database_url: Option<String>,

    /// Base URL for [`ConnectionMode::Remote`].
    pub endpoint: Option<String>,

    /// Pool size for the database backend.
    pub max_connections: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Postgres,
            database_url: None,
            endpoint: None,
            max_connections: 10,
        }
    }
}

impl ConnectionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("COVERAGE_STORE_MODE") {
            config.mode = ConnectionMode::from_str(&val);
        }

        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.database_url = Some(val);
        }

        if let Ok(val) = std::env::var("COVERAGE_STORE_ENDPOINT") {
            config.endpoint = Some(val);
        }

        if let Ok(val) = std::env::var("COVERAGE_STORE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.max_connections = n;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CatalogResult<()> {
        match self.mode {
            ConnectionMode::Postgres if self.database_url.is_none() => Err(CatalogError::Config(
                "postgres mode requires database_url".to_string(),
            )),
            ConnectionMode::Remote if self.endpoint.is_none() => Err(CatalogError::Config(
                "remote mode requires endpoint".to_string(),
            )),
            _ if self.max_connections == 0 => Err(CatalogError::Config(
                "max_connections must be > 0".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Open the configured backend.
    pub async fn connect(&self) -> CatalogResult<Arc<dyn DataConnection>> {
        self.validate()?;
        match self.mode {
            ConnectionMode::Postgres => {
                let url = self.database_url.as_deref().unwrap_or_default();
                let conn = PostgresConnection::connect(url, self.max_connections).await?;
                Ok(Arc::new(conn))
            }
            ConnectionMode::Remote => {
                let endpoint = self.endpoint.clone().unwrap_or_default();
                Ok(Arc::new(RemoteConnection::new(endpoint)))
            }
            ConnectionMode::Memory => Ok(Arc::new(MemoryConnection::new())),
        }
    }
}
