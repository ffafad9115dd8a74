// ABOUTME: Authorization code repository with single-use consumption
// ABOUTME: Codes are short-lived and always purge-eligible after a day
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use super::{parse_optional_uuid_column, parse_uuid_column, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{join_scopes, split_scopes, AuthCode, EntityStatus};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const CODE_COLUMNS: &str = "id, tenant_id, user_id, client_id, scopes, audience, redirect_uri, \
     code_challenge, code_challenge_method, status, expires_at, created_at";

impl Database {
    /// Insert a new authorization code
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn create_auth_code(&self, code: &AuthCode) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO auth_codes (id, tenant_id, user_id, client_id, scopes, audience, \
             redirect_uri, code_challenge, code_challenge_method, status, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&code.id)
        .bind(code.tenant_id.map(|id| id.to_string()))
        .bind(code.user_id.to_string())
        .bind(&code.client_id)
        .bind(join_scopes(&code.scopes))
        .bind(&code.audience)
        .bind(&code.redirect_uri)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(code.status.as_str())
        .bind(code.expires_at.timestamp())
        .bind(code.created_at.timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to create auth code: {e}")))?;
        Ok(())
    }

    /// Protocol-internal lookup by primary key, no tenant filter
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_auth_code_by_id(&self, id: &str) -> AppResult<Option<AuthCode>> {
        let row = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM auth_codes WHERE id = $1 AND status != 'deleted'"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query auth code: {e}")))?;

        row.map(|r| auth_code_from_row(&r)).transpose()
    }

    /// Atomically consume a code for token exchange
    ///
    /// The flip from active to revoked only succeeds once; a second
    /// redemption attempt returns `None`.
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn consume_auth_code(
        &self,
        id: &str,
        client_id: &str,
        redirect_uri: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<AuthCode>> {
        let code = self.find_auth_code_by_id(id).await?;
        let Some(code) = code else {
            return Ok(None);
        };

        if code.client_id != client_id
            || code.redirect_uri != redirect_uri
            || now > code.expires_at
        {
            return Ok(None);
        }

        let result = sqlx::query(
            "UPDATE auth_codes SET status = 'revoked' WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to consume auth code: {e}")))?;

        if result.rows_affected() == 1 {
            Ok(Some(code))
        } else {
            Ok(None)
        }
    }

    /// Mark a code revoked; idempotent
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_auth_code_by_id(&self, id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE auth_codes SET status = 'revoked' WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to revoke auth code: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Fail-closed revocation check: an unresolvable code is revoked
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn is_auth_code_revoked(&self, id: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT status FROM auth_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("failed to query code status: {e}")))?;

        Ok(row.map_or(true, |r| {
            EntityStatus::from_db_string(&r.get::<String, _>("status")) != EntityStatus::Active
        }))
    }
}

pub(crate) fn auth_code_from_row(row: &SqliteRow) -> AppResult<AuthCode> {
    Ok(AuthCode {
        id: row.get("id"),
        tenant_id: parse_optional_uuid_column(row.get("tenant_id"))?,
        user_id: parse_uuid_column(&row.get::<String, _>("user_id"))?,
        client_id: row.get("client_id"),
        scopes: split_scopes(&row.get::<String, _>("scopes")),
        audience: row.get("audience"),
        redirect_uri: row.get("redirect_uri"),
        code_challenge: row.get("code_challenge"),
        code_challenge_method: row.get("code_challenge_method"),
        status: EntityStatus::from_db_string(&row.get::<String, _>("status")),
        expires_at: timestamp_column(row.get("expires_at"))?,
        created_at: timestamp_column(row.get("created_at"))?,
    })
}
