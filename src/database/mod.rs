// ABOUTME: Database management for tenants, identities, conversations and messages
// ABOUTME: Owns the SQLite pool, runs idempotent migrations and hosts shared row helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Database Management
//!
//! Tenant-scoped persistence for the conversation engine. Every query that
//! touches conversations or messages filters on `tenant_id` so rows never
//! leak across tenants.

mod chat;
mod tenants;
mod users;

use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Database manager shared by all services
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to `database_url` and run migrations
    ///
    /// In-memory databases are pinned to a single connection so every query
    /// sees the same data.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the connection fails, or a
    /// migration fails
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let is_memory = database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !is_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if is_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to connect to database: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        info!(url = %database_url, "Database ready");
        Ok(db)
    }

    /// Get a reference to the database pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_tenants().await?;
        self.migrate_users().await?;
        self.migrate_chat().await?;
        debug!("Migrations applied");
        Ok(())
    }

    /// Execute one DDL statement
    async fn execute_ddl(&self, sql: &str) -> AppResult<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

/// Parse a UUID stored as TEXT
fn parse_uuid(raw: &str, column: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| AppError::database(format!("Invalid UUID in column {column}: {e}")))
}

/// Decode a JSON TEXT column
fn parse_json<T: DeserializeOwned>(raw: &str, column: &str) -> AppResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::database(format!("Invalid JSON in column {column}: {e}")))
}

/// Decode an optional JSON TEXT column
fn parse_json_opt<T: DeserializeOwned>(raw: Option<String>, column: &str) -> AppResult<Option<T>> {
    raw.map(|value| parse_json(&value, column)).transpose()
}

/// Encode a value into a JSON TEXT column
fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> AppResult<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::serialization(format!("Failed to encode column: {e}")))
}

/// Map a row decoding failure
fn column_error(column: &str, error: &sqlx::Error) -> AppError {
    AppError::database(format!("Failed to read column {column}: {error}"))
}
