// ABOUTME: Core domain entities for the multi-tenant authorization server
// ABOUTME: Tenants, clients, tokens, auth codes, scope catalog, and audit entries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status persisted for every OAuth entity
///
/// Purge removes rows physically on a separate code path; there is no
/// restorable "trashed" state beyond `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Revoked,
    Deleted,
}

impl EntityStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Deleted => "deleted",
        }
    }

    /// Parse from a database column, treating unknown values as revoked
    /// so a corrupted row never resolves as valid
    #[must_use]
    pub fn from_db_string(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "deleted" => Self::Deleted,
            _ => Self::Revoked,
        }
    }
}

/// Isolation boundary partitioning all OAuth data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

/// Where an entity came from: admin UI, DCR endpoint, or system bootstrap
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub created_from: Option<String>,
    pub created_by: Option<Uuid>,
    pub provider: Option<String>,
}

/// A registered OAuth client (confidential or public)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub id: String,
    pub tenant_id: Option<Uuid>,
    /// Owning user; None for anonymously registered clients
    pub user_id: Option<Uuid>,
    pub name: String,
    /// Hashed when secret hashing is enabled; None marks a public client
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub personal_access_client: bool,
    pub password_client: bool,
    /// First-party clients skip the consent screen for same-tenant users
    pub skip_authorization: bool,
    pub status: EntityStatus,
    pub provenance: Provenance,
    /// SHA-256 hash of the RFC 7592 management token, DCR clients only
    #[serde(skip_serializing)]
    pub registration_token_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthClient {
    /// A client with no secret is public and must present PKCE
    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.secret.is_none()
    }

    /// Whether this client was created through dynamic registration
    #[must_use]
    pub fn is_dynamically_registered(&self) -> bool {
        self.provenance.created_from.as_deref() == Some("dcr")
    }
}

/// Opaque bearer credential persisted server-side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// String key, not auto-increment
    pub id: String,
    /// Frozen at creation, never re-derived afterwards
    pub tenant_id: Option<Uuid>,
    /// None for client-credentials tokens
    pub user_id: Option<Uuid>,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// RFC 8707 resource binding
    pub audience: Option<String>,
    pub status: EntityStatus,
    pub created_from: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether this token's granted scopes cover every requested scope
    #[must_use]
    pub fn covers_scopes(&self, requested: &[String]) -> bool {
        requested.iter().all(|s| self.scopes.contains(s))
    }
}

/// 1:1 child of an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: String,
    pub access_token_id: String,
    /// Inherited from the parent access token
    pub tenant_id: Option<Uuid>,
    pub status: EntityStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Short-lived grant artifact from the interactive flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCode {
    pub id: String,
    pub tenant_id: Option<Uuid>,
    pub user_id: Uuid,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub audience: Option<String>,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub status: EntityStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Administrator-managed scope catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeDefinition {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub group: Option<String>,
    pub enabled: bool,
    /// At most one definition may be default; saving a new default demotes others
    pub is_default: bool,
    pub sort_order: i64,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Valid scope key pattern: `[a-z0-9:_-]+`
#[must_use]
pub fn is_valid_scope_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, ':' | '_' | '-'))
}

/// Append-only audit record of an OAuth lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub tenant_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    /// Dot-namespaced, e.g. `oauth.token.created`
    pub event_type: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub token_id: Option<String>,
    pub scopes: Vec<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    /// Set explicitly at insert; the table has no auto-managed timestamps
    pub created_at: DateTime<Utc>,
}

/// Join a scope list into its storage representation
#[must_use]
pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}

/// Split a stored scope string back into an ordered list
#[must_use]
pub fn split_scopes(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(ToOwned::to_owned).collect()
}
