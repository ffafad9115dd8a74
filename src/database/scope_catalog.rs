// ABOUTME: Dynamic scope catalog managed by administrators
// ABOUTME: Saving a new default demotes any previous default in one transaction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use super::{parse_optional_uuid_column, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{is_valid_scope_key, ScopeDefinition};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const SCOPE_COLUMNS: &str = "key, name, description, scope_group, enabled, is_default, \
     sort_order, created_by, created_at";

impl Database {
    /// Insert or replace a scope definition
    ///
    /// When the definition is marked default, every other definition is
    /// demoted first so at most one default exists; latest write wins.
    ///
    /// # Errors
    /// Returns an error if the key is malformed or the write fails
    pub async fn save_scope_definition(&self, scope: &ScopeDefinition) -> AppResult<()> {
        if !is_valid_scope_key(&scope.key) {
            return Err(AppError::invalid_input(format!(
                "invalid scope key: {}",
                scope.key
            )));
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| AppError::database(format!("failed to begin transaction: {e}")))?;

        if scope.is_default {
            sqlx::query("UPDATE scope_definitions SET is_default = 0 WHERE key != $1")
                .bind(&scope.key)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::database(format!("failed to demote defaults: {e}")))?;
        }

        sqlx::query(
            "INSERT INTO scope_definitions \
             (key, name, description, scope_group, enabled, is_default, sort_order, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT(key) DO UPDATE SET \
             name = excluded.name, description = excluded.description, \
             scope_group = excluded.scope_group, enabled = excluded.enabled, \
             is_default = excluded.is_default, sort_order = excluded.sort_order",
        )
        .bind(&scope.key)
        .bind(&scope.name)
        .bind(&scope.description)
        .bind(&scope.group)
        .bind(scope.enabled)
        .bind(scope.is_default)
        .bind(scope.sort_order)
        .bind(scope.created_by.map(|id| id.to_string()))
        .bind(scope.created_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("failed to save scope: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("failed to commit scope save: {e}")))?;
        Ok(())
    }

    /// Fetch one scope definition by key
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_scope_definition(&self, key: &str) -> AppResult<Option<ScopeDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {SCOPE_COLUMNS} FROM scope_definitions WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query scope: {e}")))?;

        row.map(|r| scope_from_row(&r)).transpose()
    }

    /// List all scope definitions ordered for display
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn list_scope_definitions(&self, enabled_only: bool) -> AppResult<Vec<ScopeDefinition>> {
        let sql = if enabled_only {
            format!(
                "SELECT {SCOPE_COLUMNS} FROM scope_definitions WHERE enabled = 1 \
                 ORDER BY sort_order ASC, key ASC"
            )
        } else {
            format!(
                "SELECT {SCOPE_COLUMNS} FROM scope_definitions ORDER BY sort_order ASC, key ASC"
            )
        };

        let rows = sqlx::query(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::database(format!("failed to list scopes: {e}")))?;

        rows.iter().map(scope_from_row).collect()
    }

    /// Delete a scope definition
    ///
    /// # Errors
    /// Returns an error if the delete fails
    pub async fn delete_scope_definition(&self, key: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM scope_definitions WHERE key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::database(format!("failed to delete scope: {e}")))?;
        Ok(result.rows_affected())
    }
}

fn scope_from_row(row: &SqliteRow) -> AppResult<ScopeDefinition> {
    Ok(ScopeDefinition {
        key: row.get("key"),
        name: row.get("name"),
        description: row.get("description"),
        group: row.get("scope_group"),
        enabled: row.get("enabled"),
        is_default: row.get("is_default"),
        sort_order: row.get("sort_order"),
        created_by: parse_optional_uuid_column(row.get("created_by"))?,
        created_at: timestamp_column(row.get("created_at"))?,
    })
}
