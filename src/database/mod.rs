// ABOUTME: SQLite database connection management and schema bootstrap
// ABOUTME: Repository modules extend Database with per-entity operations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

pub mod access_tokens;
pub mod activity_log;
pub mod auth_codes;
pub mod clients;
pub mod refresh_tokens;
pub mod scope_catalog;

use crate::errors::{AppError, AppResult};
use crate::models::Tenant;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// Shared database handle; cheap to clone
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and bootstrap the schema
    ///
    /// # Errors
    /// Returns an error if the connection or schema creation fails
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("invalid database URL: {e}")))?
            .create_if_missing(true);

        // In-memory databases are per-connection; pin the pool to one so
        // every query sees the bootstrapped schema
        let max_connections = if database_url.contains(":memory:") { 1 } else { 10 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("failed to connect: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Access the underlying pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("schema bootstrap failed: {e}")))?;
        Ok(())
    }

    /// Create a tenant
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn create_tenant(&self, tenant: &Tenant) -> AppResult<()> {
        sqlx::query("INSERT INTO tenants (id, name, slug, created_at) VALUES ($1, $2, $3, $4)")
            .bind(tenant.id.to_string())
            .bind(&tenant.name)
            .bind(&tenant.slug)
            .bind(tenant.created_at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("failed to create tenant: {e}")))?;
        Ok(())
    }

    /// Fetch a tenant by ID
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_tenant_by_id(&self, tenant_id: Uuid) -> AppResult<Option<Tenant>> {
        let row = sqlx::query("SELECT id, name, slug, created_at FROM tenants WHERE id = $1")
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("failed to query tenant: {e}")))?;

        row.map(|row| {
            Ok(Tenant {
                id: parse_uuid_column(&row.get::<String, _>("id"))?,
                name: row.get("name"),
                slug: row.get("slug"),
                created_at: timestamp_column(row.get("created_at"))?,
            })
        })
        .transpose()
    }

    /// Add a user to a tenant
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn add_tenant_user(&self, tenant_id: Uuid, user_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO tenant_users (tenant_id, user_id, created_at) VALUES ($1, $2, $3)",
        )
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to add tenant user: {e}")))?;
        Ok(())
    }

    /// Tenants a user belongs to, in join order
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn list_tenants_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT tenant_id FROM tenant_users WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to list tenant memberships: {e}")))?;

        rows.iter()
            .map(|row| parse_uuid_column(&row.get::<String, _>("tenant_id")))
            .collect()
    }

    /// Whether a user belongs to a tenant
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn user_belongs_to_tenant(&self, user_id: Uuid, tenant_id: Uuid) -> AppResult<bool> {
        let row =
            sqlx::query("SELECT 1 FROM tenant_users WHERE user_id = $1 AND tenant_id = $2")
                .bind(user_id.to_string())
                .bind(tenant_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("failed to check membership: {e}")))?;
        Ok(row.is_some())
    }
}

/// Parse a UUID stored as TEXT
pub(crate) fn parse_uuid_column(value: &str) -> AppResult<Uuid> {
    value
        .parse()
        .map_err(|e| AppError::database(format!("invalid UUID in database: {e}")))
}

/// Parse an optional UUID column
pub(crate) fn parse_optional_uuid_column(value: Option<String>) -> AppResult<Option<Uuid>> {
    value.as_deref().map(parse_uuid_column).transpose()
}

/// Convert a unix-seconds column into a timestamp
pub(crate) fn timestamp_column(secs: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AppError::database(format!("invalid timestamp in database: {secs}")))
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tenant_users (
    tenant_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, user_id)
);

CREATE TABLE IF NOT EXISTS oauth_clients (
    id TEXT PRIMARY KEY,
    tenant_id TEXT,
    user_id TEXT,
    name TEXT NOT NULL,
    secret TEXT,
    redirect_uris TEXT NOT NULL,
    personal_access_client INTEGER NOT NULL DEFAULT 0,
    password_client INTEGER NOT NULL DEFAULT 0,
    skip_authorization INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    created_from TEXT,
    created_by TEXT,
    provider TEXT,
    registration_token_hash TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS access_tokens (
    id TEXT PRIMARY KEY,
    tenant_id TEXT,
    user_id TEXT,
    client_id TEXT NOT NULL,
    scopes TEXT NOT NULL DEFAULT '',
    audience TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    created_from TEXT,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_access_tokens_user_client
    ON access_tokens (user_id, client_id);
CREATE INDEX IF NOT EXISTS idx_access_tokens_client
    ON access_tokens (client_id);

CREATE TABLE IF NOT EXISTS refresh_tokens (
    id TEXT PRIMARY KEY,
    access_token_id TEXT NOT NULL,
    tenant_id TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_refresh_tokens_access_token
    ON refresh_tokens (access_token_id);

CREATE TABLE IF NOT EXISTS auth_codes (
    id TEXT PRIMARY KEY,
    tenant_id TEXT,
    user_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    scopes TEXT NOT NULL DEFAULT '',
    audience TEXT,
    redirect_uri TEXT NOT NULL,
    code_challenge TEXT,
    code_challenge_method TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scope_definitions (
    key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    scope_group TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    is_default INTEGER NOT NULL DEFAULT 0,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_by TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT,
    user_id TEXT,
    event_type TEXT NOT NULL,
    resource_type TEXT,
    resource_id TEXT,
    client_id TEXT,
    client_name TEXT,
    token_id TEXT,
    scopes TEXT NOT NULL DEFAULT '',
    ip_address TEXT,
    user_agent TEXT,
    description TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activity_log_tenant
    ON activity_log (tenant_id, created_at);
";
