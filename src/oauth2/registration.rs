// ABOUTME: Dynamic client registration (RFC 7591) and self-management (RFC 7592)
// ABOUTME: Validates redirect URI policy and persists tenant-stamped client rows
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::config::ServerConfig;
use crate::database::Database;
use crate::models::{EntityStatus, OAuthClient, Provenance};
use crate::oauth2::models::{
    ClientMetadataResponse, ClientRegistrationRequest, ClientRegistrationResponse, OAuth2Error,
};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const SUPPORTED_AUTH_METHODS: &[&str] = &["client_secret_basic", "client_secret_post", "none"];
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]", "::1"];

/// Grant types every dynamically registered client receives
pub const DCR_GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token"];

/// Dynamic client registration manager
pub struct ClientRegistrar {
    database: Database,
    config: ServerConfig,
}

impl ClientRegistrar {
    #[must_use]
    pub const fn new(database: Database, config: ServerConfig) -> Self {
        Self { database, config }
    }

    /// Register a new OAuth client (RFC 7591)
    ///
    /// # Errors
    /// Returns `invalid_client_metadata` for validation failures and
    /// `server_error` for anything unexpected; internals never leak.
    pub async fn register_client(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, OAuth2Error> {
        self.validate_registration_request(&request)?;

        let auth_method = request
            .token_endpoint_auth_method
            .clone()
            .unwrap_or_else(|| "client_secret_basic".to_owned());
        let is_public = auth_method == "none";

        let client_id = format!("lg_{}", Uuid::new_v4().simple());
        let client_secret = if is_public {
            None
        } else {
            Some(generate_secret()?)
        };
        let stored_secret = match &client_secret {
            Some(secret) if self.config.hash_client_secrets => Some(hash_secret(secret)?),
            Some(secret) => Some(secret.clone()),
            None => None,
        };

        let registration_token = if self.config.registration.management_enabled {
            Some(generate_secret()?)
        } else {
            None
        };

        let now = Utc::now();
        let client = OAuthClient {
            id: client_id.clone(),
            tenant_id: self.config.default_tenant_id,
            user_id: None,
            name: request
                .client_name
                .clone()
                .unwrap_or_else(|| "Dynamically registered client".to_owned()),
            secret: stored_secret,
            redirect_uris: request.redirect_uris.clone(),
            personal_access_client: false,
            password_client: false,
            skip_authorization: false,
            status: EntityStatus::Active,
            provenance: Provenance {
                created_from: Some("dcr".to_owned()),
                created_by: None,
                provider: Some("dcr".to_owned()),
            },
            registration_token_hash: registration_token.as_deref().map(hash_registration_token),
            created_at: now,
            updated_at: now,
        };

        self.database.create_client(&client).await.map_err(|e| {
            tracing::error!(error = %e, client_id = %client_id, "failed to store registered client");
            OAuth2Error::server_error()
        })?;

        tracing::info!(client_id = %client_id, public = is_public, "registered OAuth client");

        Ok(ClientRegistrationResponse {
            client_id: client_id.clone(),
            client_id_issued_at: now.timestamp(),
            redirect_uris: request.redirect_uris,
            client_name: request.client_name,
            grant_types: DCR_GRANT_TYPES.iter().map(|s| (*s).to_owned()).collect(),
            response_types: vec!["code".to_owned()],
            token_endpoint_auth_method: auth_method,
            client_secret_expires_at: client_secret.as_ref().map(|_| 0),
            client_secret,
            registration_client_uri: registration_token
                .as_ref()
                .map(|_| format!("{}/oauth/register/{client_id}", self.config.issuer())),
            registration_access_token: registration_token,
        })
    }

    /// Resolve a client for RFC 7592 management, authorizing by token
    ///
    /// # Errors
    /// Returns `invalid_client` when the ID and token do not match a
    /// manageable client
    pub async fn find_managed_client(
        &self,
        client_id: &str,
        registration_token: &str,
    ) -> Result<OAuthClient, OAuth2Error> {
        let hash = hash_registration_token(registration_token);
        let client = self
            .database
            .find_client_by_registration_token(&hash)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "managed client lookup failed");
                OAuth2Error::server_error()
            })?
            .filter(|c| c.id == client_id)
            .ok_or_else(OAuth2Error::invalid_client)?;
        Ok(client)
    }

    /// RFC 7592 client read
    #[must_use]
    pub fn client_metadata(client: &OAuthClient) -> ClientMetadataResponse {
        ClientMetadataResponse {
            client_id: client.id.clone(),
            redirect_uris: client.redirect_uris.clone(),
            client_name: client.name.clone(),
            grant_types: DCR_GRANT_TYPES.iter().map(|s| (*s).to_owned()).collect(),
            response_types: vec!["code".to_owned()],
            token_endpoint_auth_method: if client.is_public() {
                "none".to_owned()
            } else {
                "client_secret_basic".to_owned()
            },
        }
    }

    fn validate_registration_request(
        &self,
        request: &ClientRegistrationRequest,
    ) -> Result<(), OAuth2Error> {
        if request.redirect_uris.is_empty() {
            return Err(OAuth2Error::invalid_client_metadata(
                "At least one redirect_uri is required",
            ));
        }

        for uri in &request.redirect_uris {
            self.validate_redirect_uri(uri)?;
        }

        if let Some(method) = request.token_endpoint_auth_method.as_deref() {
            if !SUPPORTED_AUTH_METHODS.contains(&method) {
                return Err(OAuth2Error::invalid_client_metadata(&format!(
                    "Unsupported token_endpoint_auth_method: {method}"
                )));
            }
        }

        Ok(())
    }

    fn validate_redirect_uri(&self, uri: &str) -> Result<(), OAuth2Error> {
        let parsed = url::Url::parse(uri).map_err(|_| {
            OAuth2Error::invalid_client_metadata(&format!("Malformed redirect_uri: {uri}"))
        })?;

        // Fragments are never valid in OAuth redirect URIs
        if parsed.fragment().is_some() {
            return Err(OAuth2Error::invalid_client_metadata(&format!(
                "redirect_uri must not contain a fragment: {uri}"
            )));
        }

        let host = parsed.host_str().ok_or_else(|| {
            OAuth2Error::invalid_client_metadata(&format!("redirect_uri has no host: {uri}"))
        })?;

        let scheme = parsed.scheme();
        let is_loopback = LOOPBACK_HOSTS.contains(&host);

        if is_loopback {
            // Development exemption: loopback may use plain http
            if scheme == "http" || scheme == "https" {
                return Ok(());
            }
            return Err(OAuth2Error::invalid_client_metadata(&format!(
                "Unsupported redirect_uri scheme: {uri}"
            )));
        }

        if scheme != "https" {
            return Err(OAuth2Error::invalid_client_metadata(&format!(
                "Non-loopback redirect_uri must use https: {uri}"
            )));
        }

        let allowed = &self.config.registration.allowed_domains;
        if !allowed.is_empty()
            && !allowed
                .iter()
                .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
        {
            return Err(OAuth2Error::invalid_client_metadata(&format!(
                "redirect_uri host is not in the allowed domain list: {host}"
            )));
        }

        Ok(())
    }
}

/// Generate a URL-safe random credential
pub(crate) fn generate_secret() -> Result<String, OAuth2Error> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|_| {
        tracing::error!("system RNG failure while generating client secret");
        OAuth2Error::server_error()
    })?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a client secret for storage using argon2id with a random salt
pub fn hash_secret(secret: &str) -> Result<String, OAuth2Error> {
    let rng = SystemRandom::new();
    let mut salt_bytes = [0u8; 16];
    rng.fill(&mut salt_bytes).map_err(|_| {
        tracing::error!("system RNG failure while generating salt");
        OAuth2Error::server_error()
    })?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| {
        tracing::error!(error = %e, "salt encoding failed");
        OAuth2Error::server_error()
    })?;
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "argon2 hashing failed");
            OAuth2Error::server_error()
        })
}

/// Registration tokens are compared by SHA-256 digest, never stored raw
#[must_use]
pub fn hash_registration_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}
