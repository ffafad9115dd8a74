// ABOUTME: Append-only audit log inserts and tenant-scoped queries
// ABOUTME: Rows are immutable once written; created_at is set explicitly
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use super::{parse_optional_uuid_column, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{join_scopes, split_scopes, ActivityLogEntry};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const ACTIVITY_COLUMNS: &str = "id, tenant_id, user_id, event_type, resource_type, resource_id, \
     client_id, client_name, token_id, scopes, ip_address, user_agent, description, metadata, \
     created_at";

impl Database {
    /// Append one audit entry; the `id` field of the input is ignored
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn insert_activity(&self, entry: &ActivityLogEntry) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO activity_log (tenant_id, user_id, event_type, resource_type, resource_id, \
             client_id, client_name, token_id, scopes, ip_address, user_agent, description, \
             metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(entry.tenant_id.map(|id| id.to_string()))
        .bind(entry.user_id.map(|id| id.to_string()))
        .bind(&entry.event_type)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.client_id)
        .bind(&entry.client_name)
        .bind(&entry.token_id)
        .bind(join_scopes(&entry.scopes))
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.description)
        .bind(entry.metadata.to_string())
        .bind(entry.created_at.timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to insert activity: {e}")))?;
        Ok(())
    }

    /// Tenant-scoped activity listing, newest first
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn list_activity_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<ActivityLogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_log \
             WHERE tenant_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(tenant_id.to_string())
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to list activity: {e}")))?;

        rows.iter().map(activity_from_row).collect()
    }
}

fn activity_from_row(row: &SqliteRow) -> AppResult<ActivityLogEntry> {
    Ok(ActivityLogEntry {
        id: row.get("id"),
        tenant_id: parse_optional_uuid_column(row.get("tenant_id"))?,
        user_id: parse_optional_uuid_column(row.get("user_id"))?,
        event_type: row.get("event_type"),
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        client_id: row.get("client_id"),
        client_name: row.get("client_name"),
        token_id: row.get("token_id"),
        scopes: split_scopes(&row.get::<String, _>("scopes")),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        description: row.get("description"),
        metadata: serde_json::from_str(&row.get::<String, _>("metadata"))
            .unwrap_or(serde_json::Value::Null),
        created_at: timestamp_column(row.get("created_at"))?,
    })
}
