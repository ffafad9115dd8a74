// ABOUTME: Refresh token repository, a 1:1 child of the access token store
// ABOUTME: Cascade revocation keys off the parent access token ID
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use super::{parse_optional_uuid_column, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{EntityStatus, RefreshToken};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const REFRESH_COLUMNS: &str = "id, access_token_id, tenant_id, status, expires_at, created_at";

impl Database {
    /// Insert a new refresh token; tenant is inherited from the parent
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn create_refresh_token(&self, token: &RefreshToken) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, access_token_id, tenant_id, status, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&token.id)
        .bind(&token.access_token_id)
        .bind(token.tenant_id.map(|id| id.to_string()))
        .bind(token.status.as_str())
        .bind(token.expires_at.timestamp())
        .bind(token.created_at.timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to create refresh token: {e}")))?;
        Ok(())
    }

    /// Protocol-internal lookup by primary key, no tenant filter
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_refresh_token_by_id(&self, id: &str) -> AppResult<Option<RefreshToken>> {
        let row = sqlx::query(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE id = $1 AND status != 'deleted'"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query refresh token: {e}")))?;

        row.map(|r| refresh_token_from_row(&r)).transpose()
    }

    /// Mark a refresh token revoked; idempotent
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_refresh_token_by_id(&self, id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET status = 'revoked' WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to revoke refresh token: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Cascade step run whenever an access token is revoked
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_refresh_tokens_for_access_token(
        &self,
        access_token_id: &str,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET status = 'revoked' \
             WHERE access_token_id = $1 AND status = 'active'",
        )
        .bind(access_token_id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to cascade refresh revocation: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Fail-closed revocation check: an unresolvable token is revoked
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn is_refresh_token_revoked(&self, id: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT status FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("failed to query refresh status: {e}")))?;

        Ok(row.map_or(true, |r| {
            EntityStatus::from_db_string(&r.get::<String, _>("status")) != EntityStatus::Active
        }))
    }

    /// The refresh token minted alongside an access token, if it still exists
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_refresh_token_for_access_token(
        &self,
        access_token_id: &str,
    ) -> AppResult<Option<RefreshToken>> {
        let row = sqlx::query(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE access_token_id = $1"
        ))
        .bind(access_token_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query refresh token: {e}")))?;

        row.map(|r| refresh_token_from_row(&r)).transpose()
    }
}

pub(crate) fn refresh_token_from_row(row: &SqliteRow) -> AppResult<RefreshToken> {
    Ok(RefreshToken {
        id: row.get("id"),
        access_token_id: row.get("access_token_id"),
        tenant_id: parse_optional_uuid_column(row.get("tenant_id"))?,
        status: EntityStatus::from_db_string(&row.get::<String, _>("status")),
        expires_at: timestamp_column(row.get("expires_at"))?,
        created_at: timestamp_column(row.get("created_at"))?,
    })
}
