//! Database layer for the collector
//!
//! Provides:
//! - SeaORM entity models
//! - Schema bootstrap
//! - Repository pattern for data access
//! - Connection pool management

pub mod models;
pub mod schema;
mod repository;

pub use repository::{
    DeleteCounts, NewEngagement, NewIdentifier, NewRequestLog, NewUrl, Repository, ResetTarget,
    TableCounts,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Single connection pool for reads and writes
    pub primary: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(config.sqlx_logging);

        let primary = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { primary })
    }

    /// Wrap an existing connection
    pub fn from_connection(primary: DatabaseConnection) -> Self {
        Self { primary }
    }

    /// Single-connection in-memory SQLite database with the schema created
    pub async fn in_memory() -> Result<Self> {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let primary = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        schema::create_tables(&primary).await?;
        Ok(Self { primary })
    }

    /// Get the connection for reads
    pub fn read(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Get the connection for writes
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;

        Ok(())
    }
}
