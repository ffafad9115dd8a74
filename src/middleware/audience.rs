// ABOUTME: Bearer token authentication with RFC 8707 audience enforcement
// ABOUTME: Failures carry an RFC 6750 WWW-Authenticate challenge with metadata URL
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::AppError;
use crate::models::{AccessToken, EntityStatus};
use axum::http::HeaderMap;
use chrono::Utc;

/// Strip scheme-insensitive `Bearer ` prefix from the Authorization header
#[must_use]
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")))
        .map(ToOwned::to_owned)
}

/// Canonical audience form: lowercase, no trailing slash
///
/// `HTTPS://Example.COM/` and `https://example.com` are the same audience.
#[must_use]
pub fn normalize_audience(audience: &str) -> String {
    audience.trim_end_matches('/').to_lowercase()
}

/// Whether a token audience is acceptable for this deployment
#[must_use]
pub fn audience_is_accepted(config: &ServerConfig, audience: &str) -> bool {
    let normalized = normalize_audience(audience);
    config
        .accepted_audiences()
        .iter()
        .any(|accepted| normalize_audience(accepted) == normalized)
}

/// Build the RFC 6750 challenge value for a 401/403 response
///
/// Always advertises the protected-resource metadata URL (RFC 9728) so
/// clients can discover the authorization server.
#[must_use]
pub fn www_authenticate(config: &ServerConfig, error: Option<&str>, description: Option<&str>) -> String {
    let mut value = format!(
        "Bearer realm=\"ledgergate\", resource_metadata=\"{}/.well-known/oauth-protected-resource\"",
        config.issuer()
    );
    if let Some(error) = error {
        value.push_str(&format!(", error=\"{error}\""));
    }
    if let Some(description) = description {
        value.push_str(&format!(", error_description=\"{description}\""));
    }
    value
}

/// Resolve and validate the bearer token on a request
///
/// Checks, in order: presence, existence, active status, expiry, audience.
/// A token bound to a foreign audience is refused with a 403
/// `invalid_audience` even though it is otherwise valid; in strict mode an
/// audience-less token is refused with a 401.
///
/// # Errors
/// Fails authentication with a message suitable for the challenge header.
pub async fn authenticate_bearer(
    database: &Database,
    config: &ServerConfig,
    headers: &HeaderMap,
) -> Result<AccessToken, AppError> {
    let token_id = extract_bearer(headers)
        .ok_or_else(|| AppError::auth_required("Missing bearer token"))?;

    let token = database
        .find_access_token_by_id(&token_id)
        .await?
        .ok_or_else(|| AppError::auth_invalid("Unknown access token"))?;

    if token.status != EntityStatus::Active {
        return Err(AppError::auth_invalid("Access token is revoked"));
    }
    if Utc::now() > token.expires_at {
        return Err(AppError::auth_invalid("Access token is expired"));
    }

    match token.audience.as_deref() {
        Some(audience) => {
            if !audience_is_accepted(config, audience) {
                tracing::warn!(
                    token_id = %token.id,
                    audience = %audience,
                    "token presented to a resource outside its audience"
                );
                return Err(AppError::invalid_audience(
                    "Access token is not valid for this resource",
                ));
            }
        }
        None => {
            if config.audience.require_audience {
                return Err(AppError::auth_invalid(
                    "Access token carries no audience binding",
                ));
            }
        }
    }

    Ok(token)
}
