// ABOUTME: OAuth client repository with tenant-scoped and protocol-internal lookups
// ABOUTME: Protocol lookups bypass the tenant filter; listings apply it
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use super::{parse_optional_uuid_column, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{EntityStatus, OAuthClient, Provenance};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const CLIENT_COLUMNS: &str = "id, tenant_id, user_id, name, secret, redirect_uris, \
     personal_access_client, password_client, skip_authorization, status, \
     created_from, created_by, provider, registration_token_hash, created_at, updated_at";

impl Database {
    /// Insert a new client
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn create_client(&self, client: &OAuthClient) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO oauth_clients (id, tenant_id, user_id, name, secret, redirect_uris, \
             personal_access_client, password_client, skip_authorization, status, \
             created_from, created_by, provider, registration_token_hash, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&client.id)
        .bind(client.tenant_id.map(|id| id.to_string()))
        .bind(client.user_id.map(|id| id.to_string()))
        .bind(&client.name)
        .bind(&client.secret)
        .bind(serde_json::to_string(&client.redirect_uris)?)
        .bind(client.personal_access_client)
        .bind(client.password_client)
        .bind(client.skip_authorization)
        .bind(client.status.as_str())
        .bind(&client.provenance.created_from)
        .bind(client.provenance.created_by.map(|id| id.to_string()))
        .bind(&client.provenance.provider)
        .bind(&client.registration_token_hash)
        .bind(client.created_at.timestamp())
        .bind(client.updated_at.timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to create client: {e}")))?;
        Ok(())
    }

    /// Protocol-internal lookup by primary key, no tenant filter
    ///
    /// Excludes soft-deleted clients; use [`Database::find_client_by_id_with_deleted`]
    /// when the deleted row itself is needed.
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_client_by_id(&self, id: &str) -> AppResult<Option<OAuthClient>> {
        let row = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM oauth_clients WHERE id = $1 AND status != 'deleted'"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query client: {e}")))?;

        row.map(|r| client_from_row(&r)).transpose()
    }

    /// Lookup by primary key including soft-deleted rows
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_client_by_id_with_deleted(&self, id: &str) -> AppResult<Option<OAuthClient>> {
        let row = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM oauth_clients WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query client: {e}")))?;

        row.map(|r| client_from_row(&r)).transpose()
    }

    /// Unscoped lookup with an explicit owner predicate
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_client_by_id_for_user(
        &self,
        id: &str,
        user_id: Uuid,
    ) -> AppResult<Option<OAuthClient>> {
        let row = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM oauth_clients \
             WHERE id = $1 AND user_id = $2 AND status != 'deleted'"
        ))
        .bind(id)
        .bind(user_id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query client: {e}")))?;

        row.map(|r| client_from_row(&r)).transpose()
    }

    /// Resolve a DCR-managed client by its registration token hash
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn find_client_by_registration_token(
        &self,
        token_hash: &str,
    ) -> AppResult<Option<OAuthClient>> {
        let row = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM oauth_clients \
             WHERE registration_token_hash = $1 AND status != 'deleted'"
        ))
        .bind(token_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to query client: {e}")))?;

        row.map(|r| client_from_row(&r)).transpose()
    }

    /// Tenant-scoped listing, the default for UI and report paths
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn list_clients_for_tenant(&self, tenant_id: Uuid) -> AppResult<Vec<OAuthClient>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM oauth_clients \
             WHERE tenant_id = $1 AND status != 'deleted' ORDER BY created_at DESC"
        ))
        .bind(tenant_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to list clients: {e}")))?;

        rows.iter().map(client_from_row).collect()
    }

    /// Owner-scoped listing within a tenant
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn list_clients_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<OAuthClient>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM oauth_clients \
             WHERE tenant_id = $1 AND user_id = $2 AND status != 'deleted' \
             ORDER BY created_at DESC"
        ))
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to list clients: {e}")))?;

        rows.iter().map(client_from_row).collect()
    }

    /// Update a client's display name and redirect URIs
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn update_client(
        &self,
        id: &str,
        name: &str,
        redirect_uris: &[String],
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE oauth_clients SET name = $2, redirect_uris = $3, updated_at = $4 \
             WHERE id = $1 AND status != 'deleted'",
        )
        .bind(id)
        .bind(name)
        .bind(serde_json::to_string(redirect_uris)?)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to update client: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Replace the stored secret, used by secret regeneration
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn update_client_secret(&self, id: &str, secret: Option<&str>) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE oauth_clients SET secret = $2, updated_at = $3 \
             WHERE id = $1 AND status != 'deleted'",
        )
        .bind(id)
        .bind(secret)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to update client secret: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Mark a client revoked; idempotent, bypasses the tenant filter
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_client_by_id(&self, id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE oauth_clients SET status = 'revoked', updated_at = $2 \
             WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to revoke client: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Soft-delete a client (user-initiated deletion of DCR clients)
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn soft_delete_client(&self, id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE oauth_clients SET status = 'deleted', updated_at = $2 \
             WHERE id = $1 AND status != 'deleted'",
        )
        .bind(id)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to delete client: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Fail-closed revocation check: an unresolvable client is revoked
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn is_client_revoked(&self, id: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT status FROM oauth_clients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("failed to query client status: {e}")))?;

        Ok(row.map_or(true, |r| {
            EntityStatus::from_db_string(&r.get::<String, _>("status")) != EntityStatus::Active
        }))
    }
}

fn client_from_row(row: &SqliteRow) -> AppResult<OAuthClient> {
    Ok(OAuthClient {
        id: row.get("id"),
        tenant_id: parse_optional_uuid_column(row.get("tenant_id"))?,
        user_id: parse_optional_uuid_column(row.get("user_id"))?,
        name: row.get("name"),
        secret: row.get("secret"),
        redirect_uris: parse_redirect_uris(&row.get::<String, _>("redirect_uris")),
        personal_access_client: row.get("personal_access_client"),
        password_client: row.get("password_client"),
        skip_authorization: row.get("skip_authorization"),
        status: EntityStatus::from_db_string(&row.get::<String, _>("status")),
        provenance: Provenance {
            created_from: row.get("created_from"),
            created_by: parse_optional_uuid_column(row.get("created_by"))?,
            provider: row.get("provider"),
        },
        registration_token_hash: row.get("registration_token_hash"),
        created_at: timestamp_column(row.get("created_at"))?,
        updated_at: timestamp_column(row.get("updated_at"))?,
    })
}

/// Legacy rows may hold a bare URI string instead of a JSON array
fn parse_redirect_uris(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|_| {
        if raw.is_empty() {
            Vec::new()
        } else {
            vec![raw.to_owned()]
        }
    })
}
