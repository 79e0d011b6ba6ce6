//! Database layer for citecrawl
//!
//! Provides:
//! - SeaORM entity models
//! - Repository implementing the persistence gateway
//! - Postgres dedup ledger
//! - Connection pool and schema bootstrap

pub mod models;
mod ledger;
mod repository;

pub use ledger::PgDedupStore;
pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

const SCHEMA: &str = include_str!("../../migrations/0001_crawl_schema.sql");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
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
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        let pool = Self { conn };
        if config.run_migrations {
            pool.migrate().await?;
        }
        Ok(pool)
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Create tables and indexes if they are missing
    pub async fn migrate(&self) -> Result<()> {
        self.conn
            .execute_unprepared(SCHEMA)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Schema bootstrap failed: {}", e),
            })?;
        info!("Database schema ready");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}
