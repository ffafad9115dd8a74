// ABOUTME: OAuth protocol engine seam: request validation, code and token issuance
// ABOUTME: Consumed as a black box by the authorization state machine and token endpoint
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::config::ServerConfig;
use crate::database::Database;
use crate::models::{AccessToken, AuthCode, EntityStatus, OAuthClient, RefreshToken};
use crate::oauth2::models::{AuthorizeRequest, OAuth2Error, TokenRequest, TokenResponse};
use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Everything the state machine hands over when finalizing an interactive grant
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub client_id: String,
    pub user_id: Uuid,
    /// Resolved once by the tenant chain; frozen into the minted code
    pub tenant_id: Option<Uuid>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub audience: Option<String>,
}

/// Result of completing an authorization request: the redirect to send
#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    pub redirect_url: String,
}

/// Protocol engine boundary
///
/// Grant-type mechanics, PKCE verification, and token minting live behind
/// this trait; the interactive flow and HTTP layer treat it as external.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Validate an inbound authorization request against protocol rules
    async fn validate_authorization_request(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<OAuthClient, OAuth2Error>;

    /// Finalize an interactive grant: mint a code on approval, or issue the
    /// standard access_denied redirect on denial
    async fn complete_authorization_request(
        &self,
        grant: AuthorizationGrant,
        approved: bool,
    ) -> Result<CompletedAuthorization, OAuth2Error>;

    /// Redeem a token request for one of the supported grant types
    async fn exchange_token(&self, request: TokenRequest) -> Result<TokenResponse, OAuth2Error>;

    /// Revoke an access token and cascade to its refresh token
    async fn revoke_token(&self, access_token_id: &str) -> Result<u64, OAuth2Error>;
}

/// Default engine backed by the local repositories
pub struct DefaultEngine {
    database: Database,
    config: ServerConfig,
}

impl DefaultEngine {
    #[must_use]
    pub const fn new(database: Database, config: ServerConfig) -> Self {
        Self { database, config }
    }

    fn generate_identifier(length: usize) -> Result<String, OAuth2Error> {
        let rng = SystemRandom::new();
        let mut bytes = vec![0u8; length];
        rng.fill(&mut bytes).map_err(|_| {
            tracing::error!("system RNG failure while generating credential");
            OAuth2Error::server_error()
        })?;
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(&bytes))
    }

    /// Verify a presented client secret against the stored one
    ///
    /// Stored secrets are argon2 hashes when hashing is enabled; older rows
    /// may hold plaintext, compared in constant time.
    pub(crate) fn verify_client_secret(stored: &str, presented: &str) -> bool {
        if stored.starts_with("$argon2") {
            PasswordHash::new(stored).is_ok_and(|hash| {
                Argon2::default()
                    .verify_password(presented.as_bytes(), &hash)
                    .is_ok()
            })
        } else {
            stored.as_bytes().ct_eq(presented.as_bytes()).into()
        }
    }

    fn verify_pkce(
        challenge: &str,
        method: Option<&str>,
        verifier: &str,
    ) -> Result<(), OAuth2Error> {
        let matches = match method.unwrap_or("plain") {
            "S256" => {
                let digest = Sha256::digest(verifier.as_bytes());
                let computed = general_purpose::URL_SAFE_NO_PAD.encode(digest);
                computed.as_bytes().ct_eq(challenge.as_bytes()).into()
            }
            "plain" => verifier.as_bytes().ct_eq(challenge.as_bytes()).into(),
            _ => false,
        };

        if matches {
            Ok(())
        } else {
            Err(OAuth2Error::invalid_grant("PKCE verification failed"))
        }
    }

    async fn authenticate_client(
        &self,
        request: &TokenRequest,
    ) -> Result<OAuthClient, OAuth2Error> {
        let client = self
            .database
            .find_client_by_id(&request.client_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "client lookup failed during token exchange");
                OAuth2Error::server_error()
            })?
            .ok_or_else(OAuth2Error::invalid_client)?;

        if client.status != EntityStatus::Active {
            return Err(OAuth2Error::invalid_client());
        }

        if let Some(stored) = &client.secret {
            let presented = request
                .client_secret
                .as_deref()
                .ok_or_else(OAuth2Error::invalid_client)?;
            if !Self::verify_client_secret(stored, presented) {
                tracing::warn!(client_id = %client.id, "client secret verification failed");
                return Err(OAuth2Error::invalid_client());
            }
        }

        Ok(client)
    }

    async fn issue_token_pair(
        &self,
        client_id: &str,
        user_id: Option<Uuid>,
        tenant_id: Option<Uuid>,
        scopes: Vec<String>,
        audience: Option<String>,
        with_refresh: bool,
    ) -> Result<TokenResponse, OAuth2Error> {
        let now = Utc::now();
        let lifetimes = &self.config.token_lifetimes;
        let expires_in = lifetimes.access_token_minutes * 60;

        let access = AccessToken {
            id: Self::generate_identifier(48)?,
            tenant_id,
            user_id,
            client_id: client_id.to_owned(),
            scopes: scopes.clone(),
            audience,
            status: EntityStatus::Active,
            created_from: Some("oauth".to_owned()),
            expires_at: now + Duration::minutes(lifetimes.access_token_minutes),
            created_at: now,
        };
        self.database.create_access_token(&access).await.map_err(|e| {
            tracing::error!(error = %e, "failed to persist access token");
            OAuth2Error::server_error()
        })?;

        let refresh_token = if with_refresh {
            let refresh = RefreshToken {
                id: Self::generate_identifier(48)?,
                access_token_id: access.id.clone(),
                tenant_id: access.tenant_id,
                status: EntityStatus::Active,
                expires_at: now + Duration::minutes(lifetimes.refresh_token_minutes),
                created_at: now,
            };
            self.database.create_refresh_token(&refresh).await.map_err(|e| {
                tracing::error!(error = %e, "failed to persist refresh token");
                OAuth2Error::server_error()
            })?;
            Some(refresh.id)
        } else {
            None
        };

        tracing::info!(
            client_id = %client_id,
            token_id = %access.id,
            tenant_id = ?access.tenant_id,
            "issued access token"
        );

        Ok(TokenResponse {
            access_token: access.id,
            token_type: "Bearer".to_owned(),
            expires_in,
            scope: if scopes.is_empty() {
                None
            } else {
                Some(scopes.join(" "))
            },
            refresh_token,
        })
    }

    async fn handle_authorization_code_grant(
        &self,
        client: &OAuthClient,
        request: TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        let code_value = request
            .code
            .ok_or_else(|| OAuth2Error::invalid_request("Missing authorization code"))?;
        let redirect_uri = request
            .redirect_uri
            .ok_or_else(|| OAuth2Error::invalid_request("Missing redirect_uri"))?;

        let code = self
            .database
            .consume_auth_code(&code_value, &client.id, &redirect_uri, Utc::now())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "auth code consumption failed");
                OAuth2Error::server_error()
            })?
            .ok_or_else(|| OAuth2Error::invalid_grant("Invalid or expired authorization code"))?;

        if let Some(challenge) = &code.code_challenge {
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| OAuth2Error::invalid_request("Missing code_verifier"))?;
            Self::verify_pkce(challenge, code.code_challenge_method.as_deref(), verifier)?;
        }

        // RFC 8707: an exchange-time resource overrides the one captured at
        // authorization time
        let audience = request.resource.or(code.audience);

        self.issue_token_pair(
            &client.id,
            Some(code.user_id),
            code.tenant_id,
            code.scopes,
            audience,
            true,
        )
        .await
    }

    async fn handle_refresh_token_grant(
        &self,
        client: &OAuthClient,
        request: TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        let refresh_value = request
            .refresh_token
            .ok_or_else(|| OAuth2Error::invalid_request("Missing refresh_token"))?;

        let refresh = self
            .database
            .find_refresh_token_by_id(&refresh_value)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "refresh token lookup failed");
                OAuth2Error::server_error()
            })?
            .filter(|t| t.status == EntityStatus::Active && Utc::now() <= t.expires_at)
            .ok_or_else(|| OAuth2Error::invalid_grant("Invalid or expired refresh token"))?;

        // The parent lookup runs without tenant context; the stateless
        // refresh request has none, and the token itself carries the stamp
        let parent = self
            .database
            .find_access_token_by_id(&refresh.access_token_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "parent token lookup failed");
                OAuth2Error::server_error()
            })?
            .ok_or_else(|| OAuth2Error::invalid_grant("Refresh token has no parent token"))?;

        if parent.client_id != client.id {
            return Err(OAuth2Error::invalid_grant(
                "Refresh token was issued to a different client",
            ));
        }

        // Rotate: the old pair dies before the new one is minted
        self.revoke_token(&parent.id).await?;

        self.issue_token_pair(
            &client.id,
            parent.user_id,
            parent.tenant_id,
            parent.scopes,
            parent.audience,
            true,
        )
        .await
    }

    async fn handle_client_credentials_grant(
        &self,
        client: &OAuthClient,
        request: TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        if client.is_public() {
            return Err(OAuth2Error::invalid_client());
        }

        let scopes = request
            .scope
            .as_deref()
            .map(crate::models::split_scopes)
            .unwrap_or_default();

        self.issue_token_pair(
            &client.id,
            None,
            client.tenant_id,
            scopes,
            request.resource,
            false,
        )
        .await
    }
}

#[async_trait]
impl ProtocolEngine for DefaultEngine {
    async fn validate_authorization_request(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<OAuthClient, OAuth2Error> {
        let client = self
            .database
            .find_client_by_id(&request.client_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "client lookup failed during authorization");
                OAuth2Error::server_error()
            })?
            .filter(|c| c.status == EntityStatus::Active)
            .ok_or_else(OAuth2Error::invalid_client)?;

        if request.response_type != "code" {
            return Err(OAuth2Error::invalid_request(
                "Only the 'code' response_type is supported",
            ));
        }

        if !client.redirect_uris.contains(&request.redirect_uri) {
            return Err(OAuth2Error::invalid_request("Invalid redirect_uri"));
        }

        if self.config.require_pkce && client.is_public() && request.code_challenge.is_none() {
            return Err(OAuth2Error::invalid_request(
                "PKCE code_challenge is required for public clients",
            ));
        }

        if let Some(method) = request.code_challenge_method.as_deref() {
            if !matches!(method, "S256" | "plain") {
                return Err(OAuth2Error::invalid_request(
                    "Unsupported code_challenge_method",
                ));
            }
        }

        Ok(client)
    }

    async fn complete_authorization_request(
        &self,
        grant: AuthorizationGrant,
        approved: bool,
    ) -> Result<CompletedAuthorization, OAuth2Error> {
        let mut redirect_url = grant.redirect_uri.clone();
        let separator = if redirect_url.contains('?') { '&' } else { '?' };

        if !approved {
            let error = OAuth2Error::access_denied();
            write!(redirect_url, "{separator}error={}", error.error).ok();
            if let Some(state) = &grant.state {
                write!(redirect_url, "&state={}", urlencoding::encode(state)).ok();
            }
            return Ok(CompletedAuthorization { redirect_url });
        }

        let now = Utc::now();
        let code = AuthCode {
            id: Self::generate_identifier(32)?,
            tenant_id: grant.tenant_id,
            user_id: grant.user_id,
            client_id: grant.client_id.clone(),
            scopes: grant.scopes,
            audience: grant.audience,
            redirect_uri: grant.redirect_uri.clone(),
            code_challenge: grant.code_challenge,
            code_challenge_method: grant.code_challenge_method,
            status: EntityStatus::Active,
            expires_at: now + Duration::minutes(self.config.token_lifetimes.auth_code_minutes),
            created_at: now,
        };
        self.database.create_auth_code(&code).await.map_err(|e| {
            tracing::error!(error = %e, "failed to persist auth code");
            OAuth2Error::server_error()
        })?;

        write!(redirect_url, "{separator}code={}", urlencoding::encode(&code.id)).ok();
        if let Some(state) = &grant.state {
            write!(redirect_url, "&state={}", urlencoding::encode(state)).ok();
        }

        Ok(CompletedAuthorization { redirect_url })
    }

    async fn exchange_token(&self, request: TokenRequest) -> Result<TokenResponse, OAuth2Error> {
        let client = self.authenticate_client(&request).await?;

        match request.grant_type.as_str() {
            "authorization_code" => self.handle_authorization_code_grant(&client, request).await,
            "refresh_token" => self.handle_refresh_token_grant(&client, request).await,
            "client_credentials" => self.handle_client_credentials_grant(&client, request).await,
            _ => Err(OAuth2Error::unsupported_grant_type()),
        }
    }

    async fn revoke_token(&self, access_token_id: &str) -> Result<u64, OAuth2Error> {
        let revoked = self
            .database
            .revoke_access_token_by_id(access_token_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "token revocation failed");
                OAuth2Error::server_error()
            })?;

        self.database
            .revoke_refresh_tokens_for_access_token(access_token_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "refresh cascade failed");
                OAuth2Error::server_error()
            })?;

        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_s256_round_trip() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = general_purpose::URL_SAFE_NO_PAD.encode(digest);
        assert!(DefaultEngine::verify_pkce(&challenge, Some("S256"), verifier).is_ok());
        assert!(DefaultEngine::verify_pkce(&challenge, Some("S256"), "wrong").is_err());
    }

    #[test]
    fn pkce_plain_compares_verbatim() {
        assert!(DefaultEngine::verify_pkce("abc123", Some("plain"), "abc123").is_ok());
        assert!(DefaultEngine::verify_pkce("abc123", None, "abc123").is_ok());
        assert!(DefaultEngine::verify_pkce("abc123", Some("plain"), "abc124").is_err());
    }

    #[test]
    fn plaintext_secret_comparison_is_exact() {
        assert!(DefaultEngine::verify_client_secret("s3cret", "s3cret"));
        assert!(!DefaultEngine::verify_client_secret("s3cret", "S3cret"));
    }
}
