// ABOUTME: Data retention engines: routine cleanup and operator-driven purge
// ABOUTME: Purge deletes physically, in dependency order, on its own code path
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use chrono::{Duration, Utc};
use serde::Serialize;

/// Counts from one cleanup run
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CleanupReport {
    pub stale_clients: u64,
    pub access_tokens: u64,
    pub refresh_tokens: u64,
    pub auth_codes: u64,
}

/// Counts from one purge run
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PurgeReport {
    pub access_tokens: u64,
    pub refresh_tokens: u64,
    pub auth_codes: u64,
}

/// Purge selection flags
#[derive(Debug, Clone, Copy)]
pub struct PurgeOptions {
    /// Include rows soft-deleted or revoked
    pub revoked: bool,
    /// Include rows expired at least `min_age_hours` ago
    pub expired: bool,
    /// Grace period after expiry before a row becomes purge-eligible
    pub min_age_hours: i64,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            revoked: true,
            expired: true,
            min_age_hours: 24,
        }
    }
}

/// Retention engine over the shared database handle
///
/// `cleanup` is routine maintenance safe to run on a schedule; `purge`
/// permanently deletes rows and is an explicit operator action.
pub struct RetentionEngine {
    database: Database,
    config: ServerConfig,
}

impl RetentionEngine {
    #[must_use]
    pub const fn new(database: Database, config: ServerConfig) -> Self {
        Self { database, config }
    }

    /// Routine maintenance pass
    ///
    /// Removes dynamically registered clients with no token activity inside
    /// the expiration window (cascading to their tokens and codes), expired
    /// tokens, and day-old authorization codes.
    ///
    /// # Errors
    /// Returns an error if any delete fails
    pub async fn cleanup(&self) -> AppResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let now = Utc::now();
        let client_cutoff =
            now - Duration::days(self.config.registration.client_expiration_days);

        // Dynamically registered means provider null or 'dcr'; rows imported
        // before the provider column existed carry null
        let stale_candidates = sqlx::query_scalar::<_, String>(
            "SELECT id FROM oauth_clients \
             WHERE (provider IS NULL OR provider = 'dcr') AND created_at < $1",
        )
        .bind(client_cutoff.timestamp())
        .fetch_all(self.database.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to list stale clients: {e}")))?;

        for client_id in stale_candidates {
            let last_activity = self
                .database
                .latest_token_created_at_for_client(&client_id)
                .await?;
            if last_activity.is_some_and(|ts| ts >= client_cutoff) {
                continue;
            }
            self.delete_client_cascade(&client_id).await?;
            report.stale_clients += 1;
        }

        report.access_tokens = self
            .execute_delete("DELETE FROM access_tokens WHERE expires_at < $1", now.timestamp())
            .await?;
        report.refresh_tokens = self
            .execute_delete("DELETE FROM refresh_tokens WHERE expires_at < $1", now.timestamp())
            .await?;

        let code_cutoff = (now - Duration::days(1)).timestamp();
        report.auth_codes = self
            .execute_delete("DELETE FROM auth_codes WHERE created_at < $1", code_cutoff)
            .await?;

        tracing::info!(
            stale_clients = report.stale_clients,
            access_tokens = report.access_tokens,
            refresh_tokens = report.refresh_tokens,
            auth_codes = report.auth_codes,
            "cleanup pass finished"
        );

        Ok(report)
    }

    /// Permanently delete revoked, deleted, and aged-out expired rows
    ///
    /// Deletion order honors referential dependencies: refresh tokens of
    /// eligible access tokens, then the access tokens, then refresh tokens
    /// orphaned by earlier runs, then authorization codes.
    ///
    /// # Errors
    /// Returns an error if any delete fails
    pub async fn purge(&self, options: &PurgeOptions) -> AppResult<PurgeReport> {
        if !options.revoked && !options.expired {
            return Ok(PurgeReport::default());
        }

        let now = Utc::now().timestamp();
        // The cutoff is only bound when the expiry clause is present
        let expiry_cutoff = options.expired.then_some(now - options.min_age_hours * 3600);
        let clause = eligibility_clause(options);
        let mut report = PurgeReport::default();

        let refresh_of_eligible = format!(
            "DELETE FROM refresh_tokens WHERE access_token_id IN \
             (SELECT id FROM access_tokens WHERE {clause})"
        );
        report.refresh_tokens += self
            .execute_purge_delete(&refresh_of_eligible, expiry_cutoff)
            .await?;

        let access = format!("DELETE FROM access_tokens WHERE {clause}");
        report.access_tokens = self.execute_purge_delete(&access, expiry_cutoff).await?;

        let orphans = sqlx::query(
            "DELETE FROM refresh_tokens WHERE access_token_id NOT IN \
             (SELECT id FROM access_tokens)",
        )
        .execute(self.database.pool())
        .await
        .map_err(|e| AppError::database(format!("orphan refresh sweep failed: {e}")))?;
        report.refresh_tokens += orphans.rows_affected();

        let codes = format!("DELETE FROM auth_codes WHERE {clause}");
        report.auth_codes = self.execute_purge_delete(&codes, expiry_cutoff).await?;

        tracing::info!(
            access_tokens = report.access_tokens,
            refresh_tokens = report.refresh_tokens,
            auth_codes = report.auth_codes,
            revoked = options.revoked,
            expired = options.expired,
            "purge finished"
        );

        Ok(report)
    }

    async fn delete_client_cascade(&self, client_id: &str) -> AppResult<()> {
        sqlx::query(
            "DELETE FROM refresh_tokens WHERE access_token_id IN \
             (SELECT id FROM access_tokens WHERE client_id = $1)",
        )
        .bind(client_id)
        .execute(self.database.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to delete client refresh tokens: {e}")))?;

        for statement in [
            "DELETE FROM access_tokens WHERE client_id = $1",
            "DELETE FROM auth_codes WHERE client_id = $1",
            "DELETE FROM oauth_clients WHERE id = $1",
        ] {
            sqlx::query(statement)
                .bind(client_id)
                .execute(self.database.pool())
                .await
                .map_err(|e| {
                    AppError::database(format!("failed to delete stale client data: {e}"))
                })?;
        }

        tracing::debug!(client_id = %client_id, "removed stale registered client");
        Ok(())
    }

    async fn execute_delete(&self, statement: &str, cutoff: i64) -> AppResult<u64> {
        let result = sqlx::query(statement)
            .bind(cutoff)
            .execute(self.database.pool())
            .await
            .map_err(|e| AppError::database(format!("retention delete failed: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn execute_purge_delete(
        &self,
        statement: &str,
        expiry_cutoff: Option<i64>,
    ) -> AppResult<u64> {
        let mut query = sqlx::query(statement);
        if let Some(cutoff) = expiry_cutoff {
            query = query.bind(cutoff);
        }
        let result = query
            .execute(self.database.pool())
            .await
            .map_err(|e| AppError::database(format!("purge delete failed: {e}")))?;
        Ok(result.rows_affected())
    }
}

/// WHERE fragment selecting purge-eligible rows, `$1` is the expiry cutoff
fn eligibility_clause(options: &PurgeOptions) -> String {
    let mut clauses = Vec::new();
    if options.revoked {
        clauses.push("status IN ('deleted', 'revoked')".to_owned());
    }
    if options.expired {
        clauses.push("expires_at <= $1".to_owned());
    }
    clauses.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessToken, AuthCode, EntityStatus, RefreshToken};
    use chrono::Utc;
    use uuid::Uuid;

    async fn engine() -> RetentionEngine {
        let database = Database::new("sqlite::memory:").await.unwrap();
        RetentionEngine::new(database, ServerConfig::default())
    }

    fn access_token(id: &str, status: EntityStatus, expires_in_minutes: i64) -> AccessToken {
        let now = Utc::now();
        AccessToken {
            id: id.to_owned(),
            tenant_id: None,
            user_id: Some(Uuid::new_v4()),
            client_id: "client-1".to_owned(),
            scopes: vec!["items:read".to_owned()],
            audience: None,
            status,
            created_from: Some("oauth".to_owned()),
            expires_at: now + Duration::minutes(expires_in_minutes),
            created_at: now - Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn purge_removes_revoked_tokens_and_their_refresh_tokens() {
        let engine = engine().await;
        let db = &engine.database;
        let now = Utc::now();

        db.create_access_token(&access_token("revoked-token", EntityStatus::Revoked, 60))
            .await
            .unwrap();
        db.create_refresh_token(&RefreshToken {
            id: "refresh-1".to_owned(),
            access_token_id: "revoked-token".to_owned(),
            tenant_id: None,
            status: EntityStatus::Active,
            expires_at: now + Duration::days(30),
            created_at: now,
        })
        .await
        .unwrap();
        db.create_access_token(&access_token("live-token", EntityStatus::Active, 60))
            .await
            .unwrap();

        let report = engine.purge(&PurgeOptions::default()).await.unwrap();
        assert_eq!(report.access_tokens, 1);
        assert_eq!(report.refresh_tokens, 1);

        assert!(db.find_access_token_by_id("revoked-token").await.unwrap().is_none());
        assert!(db.find_access_token_by_id("live-token").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_respects_the_expiry_grace_period() {
        let engine = engine().await;
        let db = &engine.database;

        // Expired one hour ago, inside the 24h grace period
        db.create_access_token(&access_token("freshly-expired", EntityStatus::Active, -60))
            .await
            .unwrap();
        // Expired two days ago, beyond the grace period
        db.create_access_token(&access_token("long-expired", EntityStatus::Active, -48 * 60))
            .await
            .unwrap();

        let report = engine
            .purge(&PurgeOptions {
                revoked: false,
                expired: true,
                min_age_hours: 24,
            })
            .await
            .unwrap();
        assert_eq!(report.access_tokens, 1);
        assert!(db.find_access_token_by_id("freshly-expired").await.unwrap().is_some());
        assert!(db.find_access_token_by_id("long-expired").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoked_only_purge_leaves_expired_rows() {
        let engine = engine().await;
        let db = &engine.database;

        db.create_access_token(&access_token("old-expired", EntityStatus::Active, -72 * 60))
            .await
            .unwrap();
        db.create_access_token(&access_token("revoked", EntityStatus::Revoked, 60))
            .await
            .unwrap();

        let report = engine
            .purge(&PurgeOptions {
                revoked: true,
                expired: false,
                min_age_hours: 24,
            })
            .await
            .unwrap();
        assert_eq!(report.access_tokens, 1);
        assert!(db.find_access_token_by_id("old-expired").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn orphaned_refresh_tokens_are_always_purged() {
        let engine = engine().await;
        let db = &engine.database;
        let now = Utc::now();

        // Parent access token row was already deleted by an earlier run
        db.create_refresh_token(&RefreshToken {
            id: "orphan".to_owned(),
            access_token_id: "gone".to_owned(),
            tenant_id: None,
            status: EntityStatus::Active,
            expires_at: now + Duration::days(30),
            created_at: now,
        })
        .await
        .unwrap();

        let report = engine.purge(&PurgeOptions::default()).await.unwrap();
        assert_eq!(report.refresh_tokens, 1);
        assert!(db.find_refresh_token_by_id("orphan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_spares_stale_clients_with_recent_tokens() {
        let engine = engine().await;
        let db = &engine.database;
        let now = Utc::now();

        let mut stale = crate::models::OAuthClient {
            id: "stale-client".to_owned(),
            tenant_id: None,
            user_id: None,
            name: "Stale".to_owned(),
            secret: None,
            redirect_uris: vec!["https://app.example.com/cb".to_owned()],
            personal_access_client: false,
            password_client: false,
            skip_authorization: false,
            status: EntityStatus::Active,
            provenance: crate::models::Provenance {
                created_from: Some("dcr".to_owned()),
                created_by: None,
                provider: Some("dcr".to_owned()),
            },
            registration_token_hash: None,
            created_at: now - Duration::days(91),
            updated_at: now - Duration::days(91),
        };
        db.create_client(&stale).await.unwrap();

        stale.id = "active-client".to_owned();
        db.create_client(&stale).await.unwrap();

        // Recent token activity exempts the second client
        let mut token = access_token("recent-token", EntityStatus::Active, 60);
        token.client_id = "active-client".to_owned();
        token.created_at = now - Duration::days(1);
        db.create_access_token(&token).await.unwrap();

        let report = engine.cleanup().await.unwrap();
        assert_eq!(report.stale_clients, 1);
        assert!(db.find_client_by_id("stale-client").await.unwrap().is_none());
        assert!(db.find_client_by_id("active-client").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_sweeps_provider_null_clients_too() {
        let engine = engine().await;
        let db = &engine.database;
        let now = Utc::now();

        let legacy = crate::models::OAuthClient {
            id: "legacy-client".to_owned(),
            tenant_id: None,
            user_id: None,
            name: "Legacy".to_owned(),
            secret: None,
            redirect_uris: vec!["https://app.example.com/cb".to_owned()],
            personal_access_client: false,
            password_client: false,
            skip_authorization: false,
            status: EntityStatus::Active,
            provenance: crate::models::Provenance {
                created_from: Some("dcr".to_owned()),
                created_by: None,
                provider: None,
            },
            registration_token_hash: None,
            created_at: now - Duration::days(120),
            updated_at: now - Duration::days(120),
        };
        db.create_client(&legacy).await.unwrap();

        let report = engine.cleanup().await.unwrap();
        assert_eq!(report.stale_clients, 1);
        assert!(db.find_client_by_id("legacy-client").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_drops_expired_tokens_and_old_codes() {
        let engine = engine().await;
        let db = &engine.database;
        let now = Utc::now();

        db.create_access_token(&access_token("expired", EntityStatus::Active, -10))
            .await
            .unwrap();
        db.create_access_token(&access_token("current", EntityStatus::Active, 30))
            .await
            .unwrap();
        db.create_auth_code(&AuthCode {
            id: "old-code".to_owned(),
            tenant_id: None,
            user_id: Uuid::new_v4(),
            client_id: "client-1".to_owned(),
            scopes: Vec::new(),
            audience: None,
            redirect_uri: "https://app.example.com/cb".to_owned(),
            code_challenge: None,
            code_challenge_method: None,
            status: EntityStatus::Active,
            expires_at: now - Duration::days(2),
            created_at: now - Duration::days(2),
        })
        .await
        .unwrap();

        let report = engine.cleanup().await.unwrap();
        assert_eq!(report.access_tokens, 1);
        assert_eq!(report.auth_codes, 1);
        assert!(db.find_access_token_by_id("current").await.unwrap().is_some());
    }
}
