// ABOUTME: OAuth 2.1 wire structures for authorization, token, and registration
// ABOUTME: Implements RFC 6749/7591 request and response bodies plus the error envelope
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use serde::{Deserialize, Serialize};

/// OAuth 2.0 authorization request (GET /oauth/authorize)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// RFC 8707 resource indicator
    pub resource: Option<String>,
}

/// OAuth 2.0 token request (POST /oauth/token, form-encoded)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    /// RFC 8707 resource indicator
    pub resource: Option<String>,
}

/// OAuth 2.0 token response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// OAuth 2.0 client registration request (RFC 7591)
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRegistrationRequest {
    pub redirect_uris: Vec<String>,
    pub client_name: Option<String>,
    pub client_uri: Option<String>,
    pub token_endpoint_auth_method: Option<String>,
    pub grant_types: Option<Vec<String>>,
    pub response_types: Option<Vec<String>>,
    pub scope: Option<String>,
}

/// OAuth 2.0 client registration response (RFC 7591)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    pub client_id_issued_at: i64,
    pub redirect_uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    /// Plaintext secret, surfaced exactly once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// 0 means the secret never expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
    /// RFC 7592 management bearer token, when self-management is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_client_uri: Option<String>,
}

/// Client metadata returned by RFC 7592 reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetadataResponse {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
    pub client_name: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
}

/// OAuth 2.0 error envelope (RFC 6749 §5.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Error {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuth2Error {
    #[must_use]
    pub fn invalid_request(description: &str) -> Self {
        Self {
            error: "invalid_request".to_owned(),
            error_description: Some(description.to_owned()),
        }
    }

    #[must_use]
    pub fn invalid_client() -> Self {
        Self {
            error: "invalid_client".to_owned(),
            error_description: Some("Client authentication failed".to_owned()),
        }
    }

    #[must_use]
    pub fn invalid_grant(description: &str) -> Self {
        Self {
            error: "invalid_grant".to_owned(),
            error_description: Some(description.to_owned()),
        }
    }

    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self {
            error: "unsupported_grant_type".to_owned(),
            error_description: Some("Grant type not supported".to_owned()),
        }
    }

    #[must_use]
    pub fn invalid_scope(description: &str) -> Self {
        Self {
            error: "invalid_scope".to_owned(),
            error_description: Some(description.to_owned()),
        }
    }

    #[must_use]
    pub fn invalid_client_metadata(description: &str) -> Self {
        Self {
            error: "invalid_client_metadata".to_owned(),
            error_description: Some(description.to_owned()),
        }
    }

    #[must_use]
    pub fn access_denied() -> Self {
        Self {
            error: "access_denied".to_owned(),
            error_description: Some("The resource owner denied the request".to_owned()),
        }
    }

    #[must_use]
    pub fn invalid_audience(description: &str) -> Self {
        Self {
            error: "invalid_audience".to_owned(),
            error_description: Some(description.to_owned()),
        }
    }

    #[must_use]
    pub fn server_error() -> Self {
        Self {
            error: "server_error".to_owned(),
            error_description: Some("An unexpected error occurred".to_owned()),
        }
    }
}

/// One scope line on the consent screen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeDescription {
    pub key: String,
    pub description: String,
}

/// Consent prompt payload surfaced when user interaction is needed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentPrompt {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uri: String,
    pub scopes: Vec<ScopeDescription>,
    /// One-time token the approve/deny form must return
    pub confirmation_token: String,
}

/// Form body for POST/DELETE /oauth/authorize
#[derive(Debug, Clone, Deserialize)]
pub struct ConsentDecisionRequest {
    pub session_id: String,
    pub confirmation_token: String,
}
