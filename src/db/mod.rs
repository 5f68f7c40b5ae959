//! Database module for persistent storage.
//!
//! Provides async SQLite database access using SQLx for:
//! - Users observed by the relay
//! - Hubs, their connections, and rules acceptance
//! - User and server bans
//! - Hub-scoped infractions and anti-swear rule sets

mod bans;
mod connections;
mod hubs;
mod infractions;
mod users;

pub use bans::{BanKind, BanRecord, BanRepository, BanScope, BanStatus};
pub use connections::{ConnectionRecord, ConnectionRepository};
pub use hubs::{AntiSwearAction, AntiSwearRule, HubRecord, HubRepository};
pub use infractions::{InfractionRecord, InfractionRepository};
pub use users::{UserRecord, UserRepository};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hub not found: {0}")]
    HubNotFound(String),
    #[error("connection not found for channel: {0}")]
    ConnectionNotFound(String),
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // In-memory database with shared cache for connection pool
            // compatibility.
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations.
    /// Checks for each table and runs the full migration if any are missing.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        // 001_init.sql: core schema (users/hubs/connections/bans).
        let core_tables = ["users", "hubs", "connections", "hub_rules_acceptance", "bans"];
        let mut core_ok = true;
        for t in core_tables {
            if !table_exists(pool, t).await {
                core_ok = false;
                break;
            }
        }
        if !core_ok {
            Self::run_migration_file(pool, include_str!("../../migrations/001_init.sql")).await;
            info!("Database migrations applied (001_init)");
        }

        // 002_infractions.sql: hub-scoped blacklist.
        if !table_exists(pool, "hub_infractions").await {
            Self::run_migration_file(pool, include_str!("../../migrations/002_infractions.sql"))
                .await;
            info!("Database migrations applied (002_infractions)");
        }

        // 003_antiswear.sql: per-hub anti-swear rule sets.
        if !table_exists(pool, "hub_antiswear_rules").await {
            Self::run_migration_file(pool, include_str!("../../migrations/003_antiswear.sql"))
                .await;
            info!("Database migrations applied (003_antiswear)");
        }

        if core_ok
            && table_exists(pool, "hub_infractions").await
            && table_exists(pool, "hub_antiswear_rules").await
        {
            info!("Database already initialized");
        }

        Ok(())
    }

    /// Run a single migration file, executing each statement.
    async fn run_migration_file(pool: &SqlitePool, migration: &str) {
        for statement in migration.split(';') {
            let mut sql_lines: Vec<&str> = Vec::new();
            for line in statement.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with("--") {
                    continue;
                }
                sql_lines.push(line);
            }

            if sql_lines.is_empty() {
                continue;
            }

            let sql = sql_lines.join("\n");

            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                let err_str = e.to_string();
                if !err_str.contains("already exists") {
                    tracing::warn!(sql = %sql, error = %e, "Migration statement failed");
                }
            }
        }
    }

    /// Get user repository.
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Get hub repository.
    pub fn hubs(&self) -> HubRepository<'_> {
        HubRepository::new(&self.pool)
    }

    /// Get connection repository.
    pub fn connections(&self) -> ConnectionRepository<'_> {
        ConnectionRepository::new(&self.pool)
    }

    /// Get ban repository.
    pub fn bans(&self) -> BanRepository<'_> {
        BanRepository::new(&self.pool)
    }

    /// Get infraction repository.
    pub fn infractions(&self) -> InfractionRepository<'_> {
        InfractionRepository::new(&self.pool)
    }
}
