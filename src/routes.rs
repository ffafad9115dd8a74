// ABOUTME: Axum router and handlers for the full OAuth HTTP surface
// ABOUTME: Discovery, authorization, token, registration, and management endpoints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::activity::{ActivityEvent, ActivityRecorder};
use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::{AppError, ErrorCode};
use crate::middleware::audience::{authenticate_bearer, extract_bearer, www_authenticate};
use crate::middleware::tenant::{tenant_context_middleware, ExtractedTenantContext};
use crate::models::{AccessToken, EntityStatus, OAuthClient, Provenance};
use crate::oauth2::authorization::{AuthorizationFlow, AuthorizationOutcome, AuthorizeError};
use crate::oauth2::engine::{DefaultEngine, ProtocolEngine};
use crate::oauth2::models::{
    AuthorizeRequest, ConsentDecisionRequest, ConsentPrompt, OAuth2Error, TokenRequest,
};
use crate::oauth2::rate_limiting::RegistrationRateLimiter;
use crate::oauth2::registration::{self, ClientRegistrar};
use crate::permissions::{PermissionCatalog, StaticPermissionCatalog};
use crate::scopes::{self, MANUAL_SCOPES};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Extension, Form, Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared resources handed to every handler
pub struct AppState {
    pub database: Database,
    pub config: ServerConfig,
    pub engine: Arc<dyn ProtocolEngine>,
    pub permissions: Arc<dyn PermissionCatalog>,
    pub flow: AuthorizationFlow,
    pub registrar: ClientRegistrar,
    pub rate_limiter: RegistrationRateLimiter,
    pub recorder: ActivityRecorder,
}

impl AppState {
    /// State without a permission registry; scope derivation is inert until
    /// [`AppState::with_permissions`] wires a real catalog in
    #[must_use]
    pub fn new(database: Database, config: ServerConfig) -> Self {
        Self::with_permissions(
            database,
            config,
            Arc::new(StaticPermissionCatalog::default()),
        )
    }

    #[must_use]
    pub fn with_permissions(
        database: Database,
        config: ServerConfig,
        permissions: Arc<dyn PermissionCatalog>,
    ) -> Self {
        let engine: Arc<dyn ProtocolEngine> =
            Arc::new(DefaultEngine::new(database.clone(), config.clone()));
        let recorder = ActivityRecorder::new(database.clone());
        let flow = AuthorizationFlow::new(
            database.clone(),
            config.clone(),
            Arc::clone(&engine),
            recorder.clone(),
            Arc::clone(&permissions),
        );
        let registrar = ClientRegistrar::new(database.clone(), config.clone());
        let rate_limiter = RegistrationRateLimiter::new(&config.registration);
        Self {
            database,
            config,
            engine,
            permissions,
            flow,
            registrar,
            rate_limiter,
            recorder,
        }
    }
}

/// Assemble the full router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/oauth/authorize",
            get(authorize_start)
                .post(authorize_approve)
                .delete(authorize_deny),
        )
        .route("/oauth/token", post(token_exchange))
        .route("/oauth/introspect", post(introspect))
        .route("/oauth/revoke", post(revoke))
        .route("/oauth/register", post(register_client))
        .route(
            "/oauth/register/:client_id",
            get(managed_client_read)
                .put(managed_client_update)
                .delete(managed_client_delete),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_metadata),
        )
        .route(
            "/oauth/.well-known/oauth-authorization-server",
            get(authorization_server_metadata),
        )
        .route(
            "/oauth/.well-known/oauth-protected-resource",
            get(protected_resource_metadata),
        )
        .route("/oauth/tokens", get(tokens_list))
        .route("/oauth/tokens/:token_id", delete(token_revoke))
        .route("/oauth/clients", get(clients_list).post(client_create))
        .route(
            "/oauth/clients/:client_id",
            get(client_read).patch(client_update).delete(client_delete),
        )
        .route("/oauth/clients/:client_id/secret", post(client_regenerate_secret))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            tenant_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---- error shaping --------------------------------------------------------

fn oauth_error_response(error: OAuth2Error) -> Response {
    let status = match error.error.as_str() {
        "invalid_client" => StatusCode::UNAUTHORIZED,
        "server_error" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(error)).into_response()
}

fn authorize_error_response(error: AuthorizeError) -> Response {
    match error {
        AuthorizeError::Protocol(e) => oauth_error_response(e),
        AuthorizeError::App(e) => e.into_response(),
    }
}

/// 401/403 with the RFC 6750 challenge header
///
/// The `error` attributes are attached only when a bearer token was
/// actually presented and rejected; a tokenless request gets realm and
/// metadata URL alone. An audience mismatch is a 403 `invalid_audience`,
/// distinct from the 401 class: the token itself is fine, it just was
/// not minted for this resource.
fn challenge_response(config: &ServerConfig, token_presented: bool, error: AppError) -> Response {
    let audience_mismatch = error.code == ErrorCode::InvalidAudience;
    let challenge = if audience_mismatch {
        www_authenticate(config, Some("invalid_audience"), Some(&error.message))
    } else if token_presented {
        www_authenticate(config, Some("invalid_token"), Some(&error.message))
    } else {
        www_authenticate(config, None, None)
    };
    let mut response = if audience_mismatch {
        (
            StatusCode::FORBIDDEN,
            Json(OAuth2Error::invalid_audience(&error.message)),
        )
            .into_response()
    } else {
        error.into_response()
    };
    if let Ok(value) = challenge.parse() {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

async fn require_token(state: &AppState, headers: &HeaderMap) -> Result<AccessToken, Response> {
    let presented = extract_bearer(headers).is_some();
    authenticate_bearer(&state.database, &state.config, headers)
        .await
        .map_err(|e| challenge_response(&state.config, presented, e))
}

async fn require_user_token(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(AccessToken, Uuid), Response> {
    let token = require_token(state, headers).await?;
    let user_id = token.user_id.ok_or_else(|| {
        challenge_response(
            &state.config,
            true,
            AppError::auth_invalid("This operation requires a user token"),
        )
    })?;
    Ok((token, user_id))
}

// ---- authorization --------------------------------------------------------

#[derive(Debug, Serialize)]
struct ConsentResponse {
    session_id: String,
    #[serde(flatten)]
    prompt: ConsentPrompt,
}

async fn authorize_start(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ExtractedTenantContext>,
    headers: HeaderMap,
    Query(request): Query<AuthorizeRequest>,
) -> Response {
    let (token, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    if let Some(resource) = request.resource.as_deref() {
        if url::Url::parse(resource).is_err() {
            return oauth_error_response(OAuth2Error::invalid_request(
                "resource must be an absolute URL",
            ));
        }
    }

    let sources = gather_tenant_sources(&state, &token, &ctx, user_id).await;

    match state.flow.begin(request, user_id, &sources).await {
        Ok(AuthorizationOutcome::Redirect { redirect_url }) => {
            Redirect::to(&redirect_url).into_response()
        }
        Ok(AuthorizationOutcome::ConsentRequired { session_id, prompt }) => {
            Json(ConsentResponse { session_id, prompt }).into_response()
        }
        Err(error) => authorize_error_response(error),
    }
}

async fn authorize_approve(
    State(state): State<Arc<AppState>>,
    Form(decision): Form<ConsentDecisionRequest>,
) -> Response {
    settle_authorization(&state, decision, true).await
}

async fn authorize_deny(
    State(state): State<Arc<AppState>>,
    Form(decision): Form<ConsentDecisionRequest>,
) -> Response {
    settle_authorization(&state, decision, false).await
}

async fn settle_authorization(
    state: &AppState,
    decision: ConsentDecisionRequest,
    approved: bool,
) -> Response {
    match state
        .flow
        .decide(&decision.session_id, &decision.confirmation_token, approved)
        .await
    {
        Ok(AuthorizationOutcome::Redirect { redirect_url }) => {
            Redirect::to(&redirect_url).into_response()
        }
        Ok(AuthorizationOutcome::ConsentRequired { .. }) => {
            oauth_error_response(OAuth2Error::server_error())
        }
        Err(error) => authorize_error_response(error),
    }
}

async fn gather_tenant_sources(
    state: &AppState,
    token: &AccessToken,
    ctx: &ExtractedTenantContext,
    user_id: Uuid,
) -> crate::tenant::TenantSources {
    let memberships = state
        .database
        .list_tenants_for_user(user_id)
        .await
        .unwrap_or_default();
    crate::tenant::TenantSources {
        token_tenant: token.tenant_id,
        pending_authorization_tenant: None,
        session_tenant: ctx.tenant_id(),
        memberships,
    }
}

// ---- token endpoint -------------------------------------------------------

/// Decode `client_secret_basic` credentials from the Authorization header
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Basic "))?;
    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, secret) = decoded.split_once(':')?;
    Some((client_id.to_owned(), secret.to_owned()))
}

async fn token_exchange(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(mut request): Form<TokenRequest>,
) -> Response {
    if let Some((client_id, client_secret)) = basic_credentials(&headers) {
        request.client_id = client_id;
        request.client_secret = Some(client_secret);
    }

    if let Some(resource) = request.resource.as_deref() {
        if url::Url::parse(resource).is_err() {
            return oauth_error_response(OAuth2Error::invalid_request(
                "resource must be an absolute URL",
            ));
        }
    }

    // A public client redeeming a code without its verifier fails fast,
    // before the code is consumed
    if state.config.require_pkce
        && request.grant_type == "authorization_code"
        && request.code_verifier.is_none()
    {
        match state.database.find_client_by_id(&request.client_id).await {
            Ok(Some(client)) if client.is_public() => {
                return oauth_error_response(OAuth2Error::invalid_request(
                    "code_verifier is required for public clients",
                ));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "client lookup failed before token exchange");
                return oauth_error_response(OAuth2Error::server_error());
            }
        }
    }

    let client_id = request.client_id.clone();
    let grant_type = request.grant_type.clone();
    match state.engine.exchange_token(request).await {
        Ok(response) => {
            state
                .recorder
                .record(
                    ActivityEvent::new("oauth.token.issued")
                        .client(&client_id, "")
                        .token(&response.access_token)
                        .description(&format!("grant_type={grant_type}")),
                )
                .await;
            Json(response).into_response()
        }
        Err(error) => oauth_error_response(error),
    }
}

// ---- introspection and revocation ----------------------------------------

#[derive(Debug, Deserialize)]
struct IntrospectionRequest {
    token: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

impl IntrospectionResponse {
    const fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            sub: None,
            aud: None,
            exp: None,
        }
    }
}

async fn authenticate_form_client(
    state: &AppState,
    headers: &HeaderMap,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<OAuthClient, OAuth2Error> {
    let (id, secret) = match basic_credentials(headers) {
        Some((id, secret)) => (id, Some(secret)),
        None => (
            client_id.ok_or_else(OAuth2Error::invalid_client)?.to_owned(),
            client_secret.map(ToOwned::to_owned),
        ),
    };

    let client = state
        .database
        .find_client_by_id(&id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "client lookup failed");
            OAuth2Error::server_error()
        })?
        .filter(|c| c.status == EntityStatus::Active)
        .ok_or_else(OAuth2Error::invalid_client)?;

    if let Some(stored) = &client.secret {
        let presented = secret.ok_or_else(OAuth2Error::invalid_client)?;
        if !DefaultEngine::verify_client_secret(stored, &presented) {
            return Err(OAuth2Error::invalid_client());
        }
    }

    Ok(client)
}

async fn introspect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(request): Form<IntrospectionRequest>,
) -> Response {
    let client = match authenticate_form_client(
        &state,
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await
    {
        Ok(client) => client,
        Err(error) => return oauth_error_response(error),
    };

    let token = match state.database.find_access_token_by_id(&request.token).await {
        Ok(Some(token)) => token,
        Ok(None) => return Json(IntrospectionResponse::inactive()).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "introspection lookup failed");
            return oauth_error_response(OAuth2Error::server_error());
        }
    };

    // Only the issuing client may introspect its tokens
    if token.client_id != client.id
        || token.status != EntityStatus::Active
        || Utc::now() > token.expires_at
    {
        return Json(IntrospectionResponse::inactive()).into_response();
    }

    Json(IntrospectionResponse {
        active: true,
        scope: if token.scopes.is_empty() {
            None
        } else {
            Some(token.scopes.join(" "))
        },
        client_id: Some(token.client_id),
        sub: token.user_id.map(|id| id.to_string()),
        aud: token.audience,
        exp: Some(token.expires_at.timestamp()),
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct RevocationRequest {
    token: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

async fn revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(request): Form<RevocationRequest>,
) -> Response {
    let client = match authenticate_form_client(
        &state,
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await
    {
        Ok(client) => client,
        Err(error) => return oauth_error_response(error),
    };

    // RFC 7009: revocation of an unknown or foreign token still returns 200
    match state.database.find_access_token_by_id(&request.token).await {
        Ok(Some(token)) if token.client_id == client.id => {
            if let Err(error) = state.engine.revoke_token(&token.id).await {
                return oauth_error_response(error);
            }
            state
                .recorder
                .record(
                    ActivityEvent::new("oauth.token.revoked")
                        .tenant(token.tenant_id)
                        .user(token.user_id)
                        .client(&client.id, &client.name)
                        .token(&token.id),
                )
                .await;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "revocation lookup failed");
            return oauth_error_response(OAuth2Error::server_error());
        }
    }

    StatusCode::OK.into_response()
}

// ---- dynamic client registration -----------------------------------------

/// Best-effort client address for rate limiting, proxy headers first
fn client_ip(headers: &HeaderMap) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .and_then(|ip| ip.parse().ok())
        })
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

async fn register_client(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<crate::oauth2::models::ClientRegistrationRequest>,
) -> Response {
    let ip = client_ip(&headers);
    let status = state.rate_limiter.check(ip);
    if status.is_limited {
        let mut response = AppError::rate_limited(format!(
            "Registration limit of {} per window reached",
            status.limit
        ))
        .into_response();
        if let Some(retry_after) = status.retry_after_seconds {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        return response;
    }

    match state.registrar.register_client(request).await {
        Ok(response) => {
            state
                .recorder
                .record(
                    ActivityEvent::new("oauth.client.registered")
                        .client(&response.client_id, response.client_name.as_deref().unwrap_or(""))
                        .requester(Some(ip.to_string()), None),
                )
                .await;
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(error) => oauth_error_response(error),
    }
}

fn registration_bearer(headers: &HeaderMap) -> Result<String, Response> {
    extract_bearer(headers).ok_or_else(|| {
        oauth_error_response(OAuth2Error::invalid_request(
            "Missing registration access token",
        ))
    })
}

async fn managed_client_read(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let token = match registration_bearer(&headers) {
        Ok(token) => token,
        Err(response) => return response,
    };
    match state.registrar.find_managed_client(&client_id, &token).await {
        Ok(client) => Json(ClientRegistrar::client_metadata(&client)).into_response(),
        Err(error) => oauth_error_response(error),
    }
}

async fn managed_client_update() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(OAuth2Error::invalid_request(
            "Client metadata update is not supported",
        )),
    )
        .into_response()
}

async fn managed_client_delete(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let token = match registration_bearer(&headers) {
        Ok(token) => token,
        Err(response) => return response,
    };
    let client = match state.registrar.find_managed_client(&client_id, &token).await {
        Ok(client) => client,
        Err(error) => return oauth_error_response(error),
    };

    if let Err(e) = state.database.revoke_access_tokens_for_client(&client.id).await {
        tracing::error!(error = %e, "failed to revoke tokens for deleted client");
        return oauth_error_response(OAuth2Error::server_error());
    }
    if let Err(e) = state.database.soft_delete_client(&client.id).await {
        tracing::error!(error = %e, "failed to delete managed client");
        return oauth_error_response(OAuth2Error::server_error());
    }

    state
        .recorder
        .record(
            ActivityEvent::new("oauth.client.deleted")
                .tenant(client.tenant_id)
                .client(&client.id, &client.name),
        )
        .await;

    StatusCode::NO_CONTENT.into_response()
}

// ---- discovery ------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AuthorizationServerMetadata {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    introspection_endpoint: String,
    revocation_endpoint: String,
    registration_endpoint: String,
    scopes_supported: Vec<String>,
    response_types_supported: Vec<String>,
    grant_types_supported: Vec<String>,
    token_endpoint_auth_methods_supported: Vec<String>,
    code_challenge_methods_supported: Vec<String>,
    tenant_isolation_enabled: bool,
    tenant_selection_header_supported: bool,
}

async fn scopes_supported(state: &AppState) -> Vec<String> {
    let mut scopes: Vec<String> = MANUAL_SCOPES.iter().map(|(key, _)| (*key).to_owned()).collect();
    for derived in scopes::derive_all_scopes(
        state.permissions.as_ref(),
        state.config.unmapped_permission_policy,
    ) {
        if !scopes.contains(&derived) {
            scopes.push(derived);
        }
    }
    match state.database.list_scope_definitions(true).await {
        Ok(definitions) => {
            for definition in definitions {
                if !scopes.contains(&definition.key) {
                    scopes.push(definition.key);
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "scope catalog listing failed for discovery"),
    }
    scopes
}

async fn authorization_server_metadata(State(state): State<Arc<AppState>>) -> Response {
    let issuer = state.config.issuer().to_owned();
    let mut grant_types = vec![
        "authorization_code".to_owned(),
        "refresh_token".to_owned(),
        "client_credentials".to_owned(),
    ];
    if state.config.password_grant_enabled {
        grant_types.push("password".to_owned());
    }

    Json(AuthorizationServerMetadata {
        authorization_endpoint: format!("{issuer}/oauth/authorize"),
        token_endpoint: format!("{issuer}/oauth/token"),
        introspection_endpoint: format!("{issuer}/oauth/introspect"),
        revocation_endpoint: format!("{issuer}/oauth/revoke"),
        registration_endpoint: format!("{issuer}/oauth/register"),
        scopes_supported: scopes_supported(&state).await,
        response_types_supported: vec!["code".to_owned(), "token".to_owned()],
        grant_types_supported: grant_types,
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_owned(),
            "client_secret_post".to_owned(),
        ],
        code_challenge_methods_supported: vec!["S256".to_owned(), "plain".to_owned()],
        tenant_isolation_enabled: state.config.tenancy_enabled,
        tenant_selection_header_supported: true,
        issuer,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct ProtectedResourceMetadata {
    resource: String,
    authorization_servers: Vec<String>,
    scopes_supported: Vec<String>,
    bearer_methods_supported: Vec<String>,
}

async fn protected_resource_metadata(State(state): State<Arc<AppState>>) -> Response {
    let issuer = state.config.issuer().to_owned();
    Json(ProtectedResourceMetadata {
        resource: format!("{issuer}/mcp"),
        authorization_servers: vec![issuer],
        scopes_supported: scopes_supported(&state).await,
        bearer_methods_supported: vec!["header".to_owned()],
    })
    .into_response()
}

// ---- token management -----------------------------------------------------

async fn tokens_list(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ExtractedTenantContext>,
    headers: HeaderMap,
) -> Response {
    let (token, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    let Some(tenant_id) = token.tenant_id.or_else(|| ctx.tenant_id()) else {
        return Json(Vec::<AccessToken>::new()).into_response();
    };

    match state.database.list_access_tokens_for_user(tenant_id, user_id).await {
        Ok(tokens) => Json(tokens).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn token_revoke(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ExtractedTenantContext>,
    Path(token_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (caller, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    let target = match state.database.find_access_token_by_id(&token_id).await {
        Ok(Some(target)) => target,
        Ok(None) => return AppError::not_found("Token not found").into_response(),
        Err(error) => return error.into_response(),
    };

    if target.user_id != Some(user_id) {
        return AppError::not_found("Token not found").into_response();
    }
    let caller_tenant = caller.tenant_id.or_else(|| ctx.tenant_id());
    if target.tenant_id.is_some() && target.tenant_id != caller_tenant {
        return AppError::tenant_mismatch("Token belongs to a different tenant").into_response();
    }

    match state.engine.revoke_token(&target.id).await {
        Ok(revoked) => {
            state
                .recorder
                .record(
                    ActivityEvent::new("oauth.token.revoked")
                        .tenant(target.tenant_id)
                        .user(target.user_id)
                        .client(&target.client_id, "")
                        .token(&target.id),
                )
                .await;
            Json(serde_json::json!({ "revoked": revoked > 0 })).into_response()
        }
        Err(error) => oauth_error_response(error),
    }
}

// ---- client management ----------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateClientRequest {
    name: String,
    redirect_uris: Vec<String>,
    /// Confidential clients get a generated secret
    #[serde(default)]
    confidential: bool,
    #[serde(default)]
    skip_authorization: bool,
}

#[derive(Debug, Serialize)]
struct CreatedClientResponse {
    #[serde(flatten)]
    client: OAuthClient,
    /// Plaintext secret, surfaced exactly once
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
}

async fn clients_list(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ExtractedTenantContext>,
    headers: HeaderMap,
) -> Response {
    let (token, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    let Some(tenant_id) = token.tenant_id.or_else(|| ctx.tenant_id()) else {
        return Json(Vec::<OAuthClient>::new()).into_response();
    };

    match state.database.list_clients_for_user(tenant_id, user_id).await {
        Ok(clients) => Json(clients).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn client_create(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<ExtractedTenantContext>,
    headers: HeaderMap,
    Json(request): Json<CreateClientRequest>,
) -> Response {
    let (token, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let tenant_id = token.tenant_id.or_else(|| ctx.tenant_id());

    let plaintext_secret = if request.confidential {
        match registration::generate_secret() {
            Ok(secret) => Some(secret),
            Err(error) => return oauth_error_response(error),
        }
    } else {
        None
    };
    let stored_secret = match &plaintext_secret {
        Some(secret) if state.config.hash_client_secrets => {
            match registration::hash_secret(secret) {
                Ok(hash) => Some(hash),
                Err(error) => return oauth_error_response(error),
            }
        }
        Some(secret) => Some(secret.clone()),
        None => None,
    };

    let now = Utc::now();
    let client = OAuthClient {
        id: format!("lg_{}", Uuid::new_v4().simple()),
        tenant_id,
        user_id: Some(user_id),
        name: request.name,
        secret: stored_secret,
        redirect_uris: request.redirect_uris,
        personal_access_client: false,
        password_client: false,
        skip_authorization: request.skip_authorization,
        status: EntityStatus::Active,
        provenance: Provenance {
            created_from: Some("api".to_owned()),
            created_by: Some(user_id),
            provider: None,
        },
        registration_token_hash: None,
        created_at: now,
        updated_at: now,
    };

    if let Err(error) = state.database.create_client(&client).await {
        return error.into_response();
    }

    state
        .recorder
        .record(
            ActivityEvent::new("oauth.client.created")
                .tenant(tenant_id)
                .user(Some(user_id))
                .client(&client.id, &client.name),
        )
        .await;

    (
        StatusCode::CREATED,
        Json(CreatedClientResponse {
            client,
            client_secret: plaintext_secret,
        }),
    )
        .into_response()
}

async fn client_read(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (_, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    match state.database.find_client_by_id_for_user(&client_id, user_id).await {
        Ok(Some(client)) => Json(client).into_response(),
        Ok(None) => AppError::not_found("Client not found").into_response(),
        Err(error) => error.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateClientRequest {
    name: Option<String>,
    redirect_uris: Option<Vec<String>>,
}

async fn client_update(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UpdateClientRequest>,
) -> Response {
    let (_, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    let client = match state.database.find_client_by_id_for_user(&client_id, user_id).await {
        Ok(Some(client)) => client,
        Ok(None) => return AppError::not_found("Client not found").into_response(),
        Err(error) => return error.into_response(),
    };

    let name = request.name.unwrap_or(client.name);
    let redirect_uris = request.redirect_uris.unwrap_or(client.redirect_uris);
    if let Err(error) = state.database.update_client(&client.id, &name, &redirect_uris).await {
        return error.into_response();
    }

    match state.database.find_client_by_id_for_user(&client_id, user_id).await {
        Ok(Some(updated)) => Json(updated).into_response(),
        Ok(None) => AppError::not_found("Client not found").into_response(),
        Err(error) => error.into_response(),
    }
}

async fn client_delete(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (_, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    let client = match state.database.find_client_by_id_for_user(&client_id, user_id).await {
        Ok(Some(client)) => client,
        Ok(None) => return AppError::not_found("Client not found").into_response(),
        Err(error) => return error.into_response(),
    };

    if let Err(error) = state.database.revoke_access_tokens_for_client(&client.id).await {
        return error.into_response();
    }
    if let Err(error) = state.database.soft_delete_client(&client.id).await {
        return error.into_response();
    }

    state
        .recorder
        .record(
            ActivityEvent::new("oauth.client.deleted")
                .tenant(client.tenant_id)
                .user(Some(user_id))
                .client(&client.id, &client.name),
        )
        .await;

    StatusCode::NO_CONTENT.into_response()
}

async fn client_regenerate_secret(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (_, user_id) = match require_user_token(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    let client = match state.database.find_client_by_id_for_user(&client_id, user_id).await {
        Ok(Some(client)) => client,
        Ok(None) => return AppError::not_found("Client not found").into_response(),
        Err(error) => return error.into_response(),
    };

    let plaintext = match registration::generate_secret() {
        Ok(secret) => secret,
        Err(error) => return oauth_error_response(error),
    };
    let stored = if state.config.hash_client_secrets {
        match registration::hash_secret(&plaintext) {
            Ok(hash) => hash,
            Err(error) => return oauth_error_response(error),
        }
    } else {
        plaintext.clone()
    };

    if let Err(error) = state
        .database
        .update_client_secret(&client.id, Some(&stored))
        .await
    {
        return error.into_response();
    }

    state
        .recorder
        .record(
            ActivityEvent::new("oauth.client.secret_regenerated")
                .tenant(client.tenant_id)
                .user(Some(user_id))
                .client(&client.id, &client.name),
        )
        .await;

    Json(serde_json::json!({
        "client_id": client.id,
        "client_secret": plaintext,
    }))
    .into_response()
}
