// ABOUTME: Interactive authorization flow: validation, auto-approval, consent sessions
// ABOUTME: Pending decisions are guarded by a strictly single-use confirmation token
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::activity::{ActivityEvent, ActivityRecorder};
use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::AppError;
use crate::models::split_scopes;
use crate::oauth2::engine::{AuthorizationGrant, ProtocolEngine};
use crate::oauth2::models::{AuthorizeRequest, ConsentPrompt, OAuth2Error, ScopeDescription};
use crate::permissions::PermissionCatalog;
use crate::scopes;
use crate::tenant::{resolve_tenant, TenantSources};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Lifecycle of one authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Requested,
    AutoApproved,
    AwaitingUserDecision,
    Approved,
    Denied,
    Rejected,
}

/// Failure surface of the interactive flow
#[derive(Debug)]
pub enum AuthorizeError {
    /// Protocol-level rejection, returned as an RFC 6749 error body
    Protocol(OAuth2Error),
    /// Application failure with its own HTTP mapping
    App(AppError),
}

impl From<OAuth2Error> for AuthorizeError {
    fn from(error: OAuth2Error) -> Self {
        Self::Protocol(error)
    }
}

impl From<AppError> for AuthorizeError {
    fn from(error: AppError) -> Self {
        Self::App(error)
    }
}

/// What the caller does next after starting an authorization
#[derive(Debug, Clone)]
pub enum AuthorizationOutcome {
    /// Grant settled without interaction; send the user here
    Redirect { redirect_url: String },
    /// User consent is needed; render the prompt and hold the session
    ConsentRequired {
        session_id: String,
        prompt: ConsentPrompt,
    },
}

/// Grant parked while the user decides
#[derive(Debug, Clone)]
struct PendingAuthorization {
    grant: AuthorizationGrant,
    client_name: String,
    confirmation_token: String,
    expires_at: DateTime<Utc>,
}

/// Drives authorization requests from arrival to redirect
///
/// Auto-approves trusted clients and previously consented scope supersets;
/// everything else parks in an in-memory session awaiting the user's
/// decision. The session's confirmation token is consumed atomically on
/// first presentation, so a replayed or mismatched form is dead on arrival.
pub struct AuthorizationFlow {
    database: Database,
    config: ServerConfig,
    engine: Arc<dyn ProtocolEngine>,
    recorder: ActivityRecorder,
    permissions: Arc<dyn PermissionCatalog>,
    pending: DashMap<String, PendingAuthorization>,
}

impl AuthorizationFlow {
    #[must_use]
    pub fn new(
        database: Database,
        config: ServerConfig,
        engine: Arc<dyn ProtocolEngine>,
        recorder: ActivityRecorder,
        permissions: Arc<dyn PermissionCatalog>,
    ) -> Self {
        Self {
            database,
            config,
            engine,
            recorder,
            permissions,
            pending: DashMap::new(),
        }
    }

    /// Start an authorization request for an authenticated user
    ///
    /// # Errors
    /// Protocol violations reject the request; a user acting outside the
    /// client's tenant is refused with a tenant mismatch.
    pub async fn begin(
        &self,
        request: AuthorizeRequest,
        user_id: Uuid,
        sources: &TenantSources,
    ) -> Result<AuthorizationOutcome, AuthorizeError> {
        self.sweep_expired();

        let client = match self.engine.validate_authorization_request(&request).await {
            Ok(client) => client,
            Err(error) => {
                self.record_transition(AuthorizationState::Rejected, &request.client_id, user_id)
                    .await;
                return Err(error.into());
            }
        };

        // Tenant is resolved exactly once here and frozen into the grant
        let resolved_tenant = resolve_tenant(sources);
        if self.config.tenancy_enabled {
            if let Some(client_tenant) = client.tenant_id {
                if resolved_tenant != Some(client_tenant) {
                    tracing::warn!(
                        client_id = %client.id,
                        user_id = %user_id,
                        "authorization refused: user tenant does not match client tenant"
                    );
                    self.record_transition(AuthorizationState::Rejected, &client.id, user_id)
                        .await;
                    return Err(AppError::tenant_mismatch(
                        "User does not belong to the client's tenant",
                    )
                    .into());
                }
            }
        }
        let tenant_id = resolved_tenant.or(client.tenant_id);

        let scopes = request
            .scope
            .as_deref()
            .or(self.config.default_scope.as_deref())
            .map(split_scopes)
            .unwrap_or_default();

        if let Err(error) = self.refuse_ungrantable_scopes(user_id, &scopes).await {
            self.record_transition(AuthorizationState::Rejected, &client.id, user_id)
                .await;
            return Err(error);
        }

        let grant = AuthorizationGrant {
            client_id: client.id.clone(),
            user_id,
            tenant_id,
            redirect_uri: request.redirect_uri.clone(),
            scopes: scopes.clone(),
            state: request.state.clone(),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request.code_challenge_method.clone(),
            audience: request.resource.clone(),
        };

        if self
            .can_auto_approve(client.skip_authorization, user_id, &client.id, &scopes)
            .await?
        {
            let completed = self.engine.complete_authorization_request(grant, true).await?;
            self.recorder
                .record(
                    ActivityEvent::new("oauth.authorization.auto_approved")
                        .tenant(tenant_id)
                        .user(Some(user_id))
                        .client(&client.id, &client.name)
                        .scopes(&scopes),
                )
                .await;
            return Ok(AuthorizationOutcome::Redirect {
                redirect_url: completed.redirect_url,
            });
        }

        let session_id = generate_session_token()?;
        let confirmation_token = generate_session_token()?;
        let prompt = ConsentPrompt {
            client_id: client.id.clone(),
            client_name: client.name.clone(),
            redirect_uri: request.redirect_uri,
            scopes: self.describe_scopes(&scopes).await,
            confirmation_token: confirmation_token.clone(),
        };

        self.pending.insert(
            session_id.clone(),
            PendingAuthorization {
                grant,
                client_name: client.name,
                confirmation_token,
                expires_at: Utc::now()
                    + Duration::minutes(self.config.token_lifetimes.auth_code_minutes),
            },
        );

        tracing::debug!(client_id = %client.id, user_id = %user_id, "authorization awaiting consent");

        Ok(AuthorizationOutcome::ConsentRequired { session_id, prompt })
    }

    /// Settle a parked authorization with the user's decision
    ///
    /// The session is consumed unconditionally: a wrong or replayed
    /// confirmation token invalidates it rather than leaving it retryable.
    ///
    /// # Errors
    /// Unknown or expired sessions and token mismatches fail authentication.
    pub async fn decide(
        &self,
        session_id: &str,
        confirmation_token: &str,
        approved: bool,
    ) -> Result<AuthorizationOutcome, AuthorizeError> {
        let (_, session) = self
            .pending
            .remove(session_id)
            .ok_or_else(|| AppError::auth_invalid("Unknown or already settled authorization"))?;

        if Utc::now() > session.expires_at {
            return Err(AppError::auth_invalid("Authorization session expired").into());
        }

        let token_matches: bool = session
            .confirmation_token
            .as_bytes()
            .ct_eq(confirmation_token.as_bytes())
            .into();
        if !token_matches {
            tracing::warn!(
                client_id = %session.grant.client_id,
                "confirmation token mismatch; authorization session invalidated"
            );
            return Err(AppError::auth_invalid("Invalid confirmation token").into());
        }

        let grant = session.grant;
        let tenant_id = grant.tenant_id;
        let user_id = grant.user_id;
        let client_id = grant.client_id.clone();
        let scopes = grant.scopes.clone();

        let completed = self
            .engine
            .complete_authorization_request(grant, approved)
            .await?;

        let event_type = if approved {
            "oauth.authorization.approved"
        } else {
            "oauth.authorization.denied"
        };
        self.recorder
            .record(
                ActivityEvent::new(event_type)
                    .tenant(tenant_id)
                    .user(Some(user_id))
                    .client(&client_id, &session.client_name)
                    .scopes(&scopes),
            )
            .await;

        Ok(AuthorizationOutcome::Redirect {
            redirect_url: completed.redirect_url,
        })
    }

    /// Tenant the in-flight session was started under, for tenant resolution
    #[must_use]
    pub fn pending_tenant(&self, session_id: &str) -> Option<Uuid> {
        self.pending
            .get(session_id)
            .and_then(|session| session.grant.tenant_id)
    }

    /// Check every requested scope against what this user can be granted
    ///
    /// A scope passes when it is on the manual allow-list, derivable from
    /// the user's held permissions, or enabled in the dynamic catalog. A
    /// deployment without a wired permission registry skips the check
    /// entirely; an empty registry would make every derived scope
    /// unreachable.
    async fn refuse_ungrantable_scopes(
        &self,
        user_id: Uuid,
        requested: &[String],
    ) -> Result<(), AuthorizeError> {
        if requested.is_empty() || self.permissions.all_permissions().is_empty() {
            return Ok(());
        }

        let held = scopes::scopes_for_user(
            self.permissions.as_ref(),
            user_id,
            self.config.unmapped_permission_policy,
        );
        for scope in requested {
            if scopes::MANUAL_SCOPES.iter().any(|(key, _)| *key == scope.as_str()) {
                continue;
            }
            if held.contains(scope) {
                continue;
            }
            let catalog_entry = self
                .database
                .get_scope_definition(scope)
                .await
                .map_err(AuthorizeError::App)?;
            if catalog_entry.is_some_and(|definition| definition.enabled) {
                continue;
            }
            tracing::warn!(
                user_id = %user_id,
                scope = %scope,
                "requested scope is not grantable to this user"
            );
            return Err(OAuth2Error::invalid_scope(&format!(
                "Scope is not grantable to this user: {scope}"
            ))
            .into());
        }
        Ok(())
    }

    async fn can_auto_approve(
        &self,
        skip_authorization: bool,
        user_id: Uuid,
        client_id: &str,
        scopes: &[String],
    ) -> Result<bool, AuthorizeError> {
        if skip_authorization {
            return Ok(true);
        }

        let existing = self
            .database
            .find_valid_token_for_user_and_client(user_id, client_id, scopes)
            .await
            .map_err(AuthorizeError::App)?;
        Ok(existing.is_some())
    }

    async fn describe_scopes(&self, scopes: &[String]) -> Vec<ScopeDescription> {
        let mut described = Vec::with_capacity(scopes.len());
        for key in scopes {
            let description = match self.database.get_scope_definition(key).await {
                Ok(Some(definition)) => definition
                    .description
                    .unwrap_or_else(|| scopes::describe(key)),
                Ok(None) => scopes::describe(key),
                Err(e) => {
                    tracing::warn!(scope = %key, error = %e, "scope catalog lookup failed");
                    scopes::describe(key)
                }
            };
            described.push(ScopeDescription {
                key: key.clone(),
                description,
            });
        }
        described
    }

    async fn record_transition(&self, state: AuthorizationState, client_id: &str, user_id: Uuid) {
        if state == AuthorizationState::Rejected {
            self.recorder
                .record(
                    ActivityEvent::new("oauth.authorization.rejected")
                        .user(Some(user_id))
                        .client(client_id, ""),
                )
                .await;
        }
    }

    fn sweep_expired(&self) {
        let now = Utc::now();
        self.pending.retain(|_, session| session.expires_at > now);
    }
}

fn generate_session_token() -> Result<String, OAuth2Error> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|_| {
        tracing::error!("system RNG failure while generating session token");
        OAuth2Error::server_error()
    })?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityStatus, OAuthClient, Provenance};
    use crate::oauth2::engine::DefaultEngine;
    use crate::permissions::StaticPermissionCatalog;

    async fn flow_with_client(skip_authorization: bool) -> (AuthorizationFlow, OAuthClient) {
        flow_with_catalog(skip_authorization, StaticPermissionCatalog::default()).await
    }

    async fn flow_with_catalog(
        skip_authorization: bool,
        catalog: StaticPermissionCatalog,
    ) -> (AuthorizationFlow, OAuthClient) {
        let database = Database::new("sqlite::memory:").await.unwrap();
        let config = ServerConfig::default();
        let now = Utc::now();
        let client = OAuthClient {
            id: "client-1".to_owned(),
            tenant_id: None,
            user_id: None,
            name: "Test Client".to_owned(),
            secret: None,
            redirect_uris: vec!["https://app.example.com/cb".to_owned()],
            personal_access_client: false,
            password_client: false,
            skip_authorization,
            status: EntityStatus::Active,
            provenance: Provenance {
                created_from: Some("dcr".to_owned()),
                created_by: None,
                provider: None,
            },
            registration_token_hash: None,
            created_at: now,
            updated_at: now,
        };
        database.create_client(&client).await.unwrap();

        let engine = Arc::new(DefaultEngine::new(database.clone(), config.clone()));
        let recorder = ActivityRecorder::new(database.clone());
        (
            AuthorizationFlow::new(database, config, engine, recorder, Arc::new(catalog)),
            client,
        )
    }

    fn authorize_request(client_id: &str) -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: "code".to_owned(),
            client_id: client_id.to_owned(),
            redirect_uri: "https://app.example.com/cb".to_owned(),
            scope: Some("items:read".to_owned()),
            state: Some("xyz".to_owned()),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_owned()),
            code_challenge_method: Some("S256".to_owned()),
            resource: None,
        }
    }

    #[tokio::test]
    async fn trusted_client_auto_approves() {
        let (flow, client) = flow_with_client(true).await;
        let outcome = flow
            .begin(
                authorize_request(&client.id),
                Uuid::new_v4(),
                &TenantSources::default(),
            )
            .await
            .unwrap();

        match outcome {
            AuthorizationOutcome::Redirect { redirect_url } => {
                assert!(redirect_url.contains("code="));
                assert!(redirect_url.contains("state=xyz"));
            }
            AuthorizationOutcome::ConsentRequired { .. } => panic!("expected auto-approval"),
        }
    }

    #[tokio::test]
    async fn untrusted_client_requires_consent() {
        let (flow, client) = flow_with_client(false).await;
        let outcome = flow
            .begin(
                authorize_request(&client.id),
                Uuid::new_v4(),
                &TenantSources::default(),
            )
            .await
            .unwrap();

        match outcome {
            AuthorizationOutcome::ConsentRequired { prompt, .. } => {
                assert_eq!(prompt.client_id, client.id);
                assert_eq!(prompt.scopes.len(), 1);
                assert!(!prompt.confirmation_token.is_empty());
            }
            AuthorizationOutcome::Redirect { .. } => panic!("expected consent prompt"),
        }
    }

    #[tokio::test]
    async fn approval_redirects_with_code() {
        let (flow, client) = flow_with_client(false).await;
        let outcome = flow
            .begin(
                authorize_request(&client.id),
                Uuid::new_v4(),
                &TenantSources::default(),
            )
            .await
            .unwrap();

        let AuthorizationOutcome::ConsentRequired { session_id, prompt } = outcome else {
            panic!("expected consent prompt");
        };

        let decided = flow
            .decide(&session_id, &prompt.confirmation_token, true)
            .await
            .unwrap();
        let AuthorizationOutcome::Redirect { redirect_url } = decided else {
            panic!("expected redirect");
        };
        assert!(redirect_url.starts_with("https://app.example.com/cb?code="));
    }

    #[tokio::test]
    async fn denial_redirects_with_access_denied() {
        let (flow, client) = flow_with_client(false).await;
        let outcome = flow
            .begin(
                authorize_request(&client.id),
                Uuid::new_v4(),
                &TenantSources::default(),
            )
            .await
            .unwrap();

        let AuthorizationOutcome::ConsentRequired { session_id, prompt } = outcome else {
            panic!("expected consent prompt");
        };

        let decided = flow
            .decide(&session_id, &prompt.confirmation_token, false)
            .await
            .unwrap();
        let AuthorizationOutcome::Redirect { redirect_url } = decided else {
            panic!("expected redirect");
        };
        assert!(redirect_url.contains("error=access_denied"));
    }

    #[tokio::test]
    async fn confirmation_token_is_single_use() {
        let (flow, client) = flow_with_client(false).await;
        let outcome = flow
            .begin(
                authorize_request(&client.id),
                Uuid::new_v4(),
                &TenantSources::default(),
            )
            .await
            .unwrap();

        let AuthorizationOutcome::ConsentRequired { session_id, prompt } = outcome else {
            panic!("expected consent prompt");
        };

        flow.decide(&session_id, &prompt.confirmation_token, true)
            .await
            .unwrap();
        // Replay with the same token must fail
        assert!(flow
            .decide(&session_id, &prompt.confirmation_token, true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn wrong_confirmation_token_burns_the_session() {
        let (flow, client) = flow_with_client(false).await;
        let outcome = flow
            .begin(
                authorize_request(&client.id),
                Uuid::new_v4(),
                &TenantSources::default(),
            )
            .await
            .unwrap();

        let AuthorizationOutcome::ConsentRequired { session_id, prompt } = outcome else {
            panic!("expected consent prompt");
        };

        assert!(flow.decide(&session_id, "wrong-token", true).await.is_err());
        // The real token no longer works either
        assert!(flow
            .decide(&session_id, &prompt.confirmation_token, true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn existing_superset_grant_skips_consent() {
        let (flow, client) = flow_with_client(false).await;
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        flow.database
            .create_access_token(&crate::models::AccessToken {
                id: "prior-token".to_owned(),
                tenant_id: None,
                user_id: Some(user_id),
                client_id: client.id.clone(),
                scopes: vec!["items:read".to_owned(), "items:write".to_owned()],
                audience: None,
                status: crate::models::EntityStatus::Active,
                created_from: Some("oauth".to_owned()),
                expires_at: now + chrono::Duration::hours(1),
                created_at: now,
            })
            .await
            .unwrap();

        // Same-or-smaller scope set completes without a prompt
        let outcome = flow
            .begin(authorize_request(&client.id), user_id, &TenantSources::default())
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizationOutcome::Redirect { .. }));

        // A different user still sees the consent screen
        let other = flow
            .begin(
                authorize_request(&client.id),
                Uuid::new_v4(),
                &TenantSources::default(),
            )
            .await
            .unwrap();
        assert!(matches!(other, AuthorizationOutcome::ConsentRequired { .. }));
    }

    #[tokio::test]
    async fn scope_outside_the_users_permissions_is_refused() {
        let user_id = Uuid::new_v4();
        let mut catalog = StaticPermissionCatalog::new(vec![
            "read-sales-invoices".to_owned(),
            "create-sales-invoices".to_owned(),
        ]);
        catalog.grant(user_id, vec!["read-sales-invoices".to_owned()]);
        let (flow, client) = flow_with_catalog(true, catalog).await;

        let mut request = authorize_request(&client.id);
        request.scope = Some("sales:write".to_owned());
        let result = flow.begin(request, user_id, &TenantSources::default()).await;

        assert!(
            matches!(result, Err(AuthorizeError::Protocol(ref e)) if e.error == "invalid_scope")
        );
    }

    #[tokio::test]
    async fn permission_derived_scope_is_granted() {
        let user_id = Uuid::new_v4();
        let mut catalog = StaticPermissionCatalog::new(vec![
            "read-sales-invoices".to_owned(),
            "create-sales-invoices".to_owned(),
        ]);
        catalog.grant(user_id, vec!["read-sales-invoices".to_owned()]);
        let (flow, client) = flow_with_catalog(true, catalog).await;

        let mut request = authorize_request(&client.id);
        request.scope = Some("sales:read".to_owned());
        let outcome = flow
            .begin(request, user_id, &TenantSources::default())
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizationOutcome::Redirect { .. }));
    }

    #[tokio::test]
    async fn manual_scopes_bypass_the_permission_registry() {
        // Registry is populated but the user holds nothing
        let catalog = StaticPermissionCatalog::new(vec!["read-sales-invoices".to_owned()]);
        let (flow, client) = flow_with_catalog(true, catalog).await;

        let mut request = authorize_request(&client.id);
        request.scope = Some("mcp:use".to_owned());
        let outcome = flow
            .begin(request, Uuid::new_v4(), &TenantSources::default())
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizationOutcome::Redirect { .. }));
    }

    #[tokio::test]
    async fn catalog_enabled_scope_is_grantable_without_a_permission() {
        let user_id = Uuid::new_v4();
        let catalog = StaticPermissionCatalog::new(vec!["read-sales-invoices".to_owned()]);
        let (flow, client) = flow_with_catalog(true, catalog).await;

        flow.database
            .save_scope_definition(&crate::models::ScopeDefinition {
                key: "reports:read".to_owned(),
                name: "Reports".to_owned(),
                description: None,
                group: None,
                enabled: true,
                is_default: false,
                sort_order: 0,
                created_by: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut request = authorize_request(&client.id);
        request.scope = Some("reports:read".to_owned());
        let outcome = flow
            .begin(request, user_id, &TenantSources::default())
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizationOutcome::Redirect { .. }));
    }

    #[tokio::test]
    async fn tenant_mismatch_is_refused() {
        let (flow, _) = flow_with_client(false).await;
        let database = flow.database.clone();

        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        let scoped = OAuthClient {
            id: "client-tenant".to_owned(),
            tenant_id: Some(tenant_id),
            user_id: None,
            name: "Tenant Client".to_owned(),
            secret: None,
            redirect_uris: vec!["https://app.example.com/cb".to_owned()],
            personal_access_client: false,
            password_client: false,
            skip_authorization: true,
            status: EntityStatus::Active,
            provenance: Provenance::default(),
            registration_token_hash: None,
            created_at: now,
            updated_at: now,
        };
        database.create_client(&scoped).await.unwrap();

        let sources = TenantSources {
            session_tenant: Some(Uuid::new_v4()),
            ..TenantSources::default()
        };
        let result = flow
            .begin(authorize_request(&scoped.id), Uuid::new_v4(), &sources)
            .await;
        assert!(matches!(result, Err(AuthorizeError::App(_))));
    }
}
