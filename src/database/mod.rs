//! SeaORM-based database implementation
//!
//! Database-agnostic access using SeaORM with support for SQLite and
//! PostgreSQL. Holds the three persisted tables: `users`,
//! `distributed_locks` and the general-purpose `cache`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database as SeaOrmDatabase, DatabaseBackend, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::info;

pub mod migrations;
pub mod repositories;

/// Database connection manager
#[derive(Clone)]
pub struct Database {
    pub connection: Arc<DatabaseConnection>,
    pub backend: DatabaseBackend,
}

impl Database {
    /// Connect and run pending migrations
    pub async fn connect(url: &str) -> Result<Self> {
        let backend = if url.starts_with("postgres") {
            DatabaseBackend::Postgres
        } else {
            DatabaseBackend::Sqlite
        };

        let mut options = ConnectOptions::new(url);
        options
            .max_connections(10)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(600));

        let connection = SeaOrmDatabase::connect(options)
            .await
            .context("database connection failed")?;

        migrations::Migrator::up(&connection, None)
            .await
            .context("database migration failed")?;

        info!(backend = ?backend, "database connected and migrated");

        Ok(Self {
            connection: Arc::new(connection),
            backend,
        })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.connection
    }
}
