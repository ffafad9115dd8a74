// ABOUTME: Access token repository with fail-closed revocation semantics
// ABOUTME: Tenant ID is written once at insert and never updated afterwards
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use super::{parse_optional_uuid_column, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{join_scopes, split_scopes, AccessToken, EntityStatus};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const TOKEN_COLUMNS: &str = "id, tenant_id, user_id, client_id, scopes, audience, status, \
     created_from, expires_at, created_at";

impl Database {
    /// Insert a new access token; the tenant stamp must already be resolved
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn create_access_token(&self, token: &AccessToken) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO access_tokens (id, tenant_id, user_id, client_id, scopes, audience, \
             status, created_from, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&token.id)
        .bind(token.tenant_id.map(|id| id.to_string()))
        .bind(token.user_id.map(|id| id.to_string()))
        .bind(&token.client_id)
        .bind(join_scopes(&token.scopes))
        .bind(&token.audience)
        .bind(token.status.as_str())
        .bind(&token.created_from)
        .bind(token.expires_at.timestamp())
        .bind(token.created_at.timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to create access token: {e}")))?;
        Ok(())
    }

    /// Protocol-internal lookup by primary key, no tenant filter
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_access_token_by_id(&self, id: &str) -> AppResult<Option<AccessToken>> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE id = $1 AND status != 'deleted'"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query access token: {e}")))?;

        row.map(|r| access_token_from_row(&r)).transpose()
    }

    /// Unscoped lookup with an explicit owner predicate
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_access_token_by_id_for_user(
        &self,
        id: &str,
        user_id: Uuid,
    ) -> AppResult<Option<AccessToken>> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM access_tokens \
             WHERE id = $1 AND user_id = $2 AND status != 'deleted'"
        ))
        .bind(id)
        .bind(user_id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query access token: {e}")))?;

        row.map(|r| access_token_from_row(&r)).transpose()
    }

    /// Mark a token revoked; idempotent, bypasses the tenant filter
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_access_token_by_id(&self, id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE access_tokens SET status = 'revoked' WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to revoke access token: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Fail-closed revocation check: an unresolvable token is revoked
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn is_access_token_revoked(&self, id: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT status FROM access_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("failed to query token status: {e}")))?;

        Ok(row.map_or(true, |r| {
            EntityStatus::from_db_string(&r.get::<String, _>("status")) != EntityStatus::Active
        }))
    }

    /// Find an unrevoked, unexpired token for this user and client whose
    /// granted scopes cover the requested set
    ///
    /// Bypasses the tenant filter: this backs the skip-reauthorization check
    /// and the request may not carry a tenant context yet.
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_valid_token_for_user_and_client(
        &self,
        user_id: Uuid,
        client_id: &str,
        requested_scopes: &[String],
    ) -> AppResult<Option<AccessToken>> {
        let rows = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM access_tokens \
             WHERE user_id = $1 AND client_id = $2 AND status = 'active' AND expires_at > $3 \
             ORDER BY created_at DESC"
        ))
        .bind(user_id.to_string())
        .bind(client_id)
        .bind(Utc::now().timestamp())
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query valid tokens: {e}")))?;

        for row in &rows {
            let token = access_token_from_row(row)?;
            if token.covers_scopes(requested_scopes) {
                return Ok(Some(token));
            }
        }
        Ok(None)
    }

    /// Tenant-scoped listing of a user's tokens for UI paths
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn list_access_tokens_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<AccessToken>> {
        let rows = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM access_tokens \
             WHERE tenant_id = $1 AND user_id = $2 AND status != 'deleted' \
             ORDER BY created_at DESC"
        ))
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to list access tokens: {e}")))?;

        rows.iter().map(access_token_from_row).collect()
    }

    /// Revoke every active token issued to a client
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_access_tokens_for_client(&self, client_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE access_tokens SET status = 'revoked' \
             WHERE client_id = $1 AND status = 'active'",
        )
        .bind(client_id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to revoke client tokens: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Timestamp of the most recent token issued to a client, if any
    ///
    /// Used by cleanup's per-client recent-activity check.
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn latest_token_created_at_for_client(
        &self,
        client_id: &str,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(created_at) AS latest FROM access_tokens WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query token activity: {e}")))?;

        row.get::<Option<i64>, _>("latest")
            .map(timestamp_column)
            .transpose()
    }
}

pub(crate) fn access_token_from_row(row: &SqliteRow) -> AppResult<AccessToken> {
    Ok(AccessToken {
        id: row.get("id"),
        tenant_id: parse_optional_uuid_column(row.get("tenant_id"))?,
        user_id: parse_optional_uuid_column(row.get("user_id"))?,
        client_id: row.get("client_id"),
        scopes: split_scopes(&row.get::<String, _>("scopes")),
        audience: row.get("audience"),
        status: EntityStatus::from_db_string(&row.get::<String, _>("status")),
        created_from: row.get("created_from"),
        expires_at: timestamp_column(row.get("expires_at"))?,
        created_at: timestamp_column(row.get("created_at"))?,
    })
}
