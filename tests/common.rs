// ABOUTME: Shared helpers for integration tests: state setup, seeding, requests
// ABOUTME: Every test runs against an in-memory SQLite database
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use ledgergate::config::ServerConfig;
use ledgergate::database::Database;
use ledgergate::models::{AccessToken, EntityStatus, OAuthClient, Provenance, Tenant};
use ledgergate::permissions::StaticPermissionCatalog;
use ledgergate::routes::{router, AppState};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub async fn test_state() -> Arc<AppState> {
    state_with_config(ServerConfig::default()).await
}

pub async fn state_with_config(config: ServerConfig) -> Arc<AppState> {
    let database = Database::new("sqlite::memory:").await.unwrap();
    Arc::new(AppState::new(database, config))
}

pub async fn state_with_permissions(
    config: ServerConfig,
    catalog: StaticPermissionCatalog,
) -> Arc<AppState> {
    let database = Database::new("sqlite::memory:").await.unwrap();
    Arc::new(AppState::with_permissions(database, config, Arc::new(catalog)))
}

pub fn app(state: &Arc<AppState>) -> Router {
    router(Arc::clone(state))
}

pub async fn seed_tenant(state: &AppState, name: &str) -> Uuid {
    let tenant = Tenant {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        slug: name.to_lowercase().replace(' ', "-"),
        created_at: Utc::now(),
    };
    state.database.create_tenant(&tenant).await.unwrap();
    tenant.id
}

/// Seed a user with an active bearer token, optionally tenant-stamped
pub async fn seed_user_token(state: &AppState, tenant_id: Option<Uuid>) -> (Uuid, String) {
    seed_user_token_with_audience(state, tenant_id, None).await
}

pub async fn seed_user_token_with_audience(
    state: &AppState,
    tenant_id: Option<Uuid>,
    audience: Option<&str>,
) -> (Uuid, String) {
    let user_id = Uuid::new_v4();
    if let Some(tid) = tenant_id {
        state.database.add_tenant_user(tid, user_id).await.unwrap();
    }
    let token_id = format!("tok_{}", Uuid::new_v4().simple());
    let now = Utc::now();
    state
        .database
        .create_access_token(&AccessToken {
            id: token_id.clone(),
            tenant_id,
            user_id: Some(user_id),
            client_id: "seed-client".to_owned(),
            scopes: vec!["mcp:use".to_owned()],
            audience: audience.map(ToOwned::to_owned),
            status: EntityStatus::Active,
            created_from: Some("test".to_owned()),
            expires_at: now + Duration::hours(1),
            created_at: now,
        })
        .await
        .unwrap();
    (user_id, token_id)
}

/// Seed an OAuth client owned by nobody
pub async fn seed_client(
    state: &AppState,
    id: &str,
    redirect_uri: &str,
    public: bool,
    skip_authorization: bool,
) -> OAuthClient {
    let now = Utc::now();
    let client = OAuthClient {
        id: id.to_owned(),
        tenant_id: None,
        user_id: None,
        name: format!("Client {id}"),
        secret: if public {
            None
        } else {
            Some("plain-secret".to_owned())
        },
        redirect_uris: vec![redirect_uri.to_owned()],
        personal_access_client: false,
        password_client: false,
        skip_authorization,
        status: EntityStatus::Active,
        provenance: Provenance {
            created_from: Some("test".to_owned()),
            created_by: None,
            provider: None,
        },
        registration_token_hash: None,
        created_at: now,
        updated_at: now,
    };
    state.database.create_client(&client).await.unwrap();
    client
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_authed(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_form<T: serde::Serialize>(uri: &str, body: &T) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(body).unwrap()))
        .unwrap()
}

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn expect_json(app: Router, request: Request<Body>, status: StatusCode) -> serde_json::Value {
    let response = send(app, request).await;
    assert_eq!(response.status(), status);
    body_json(response).await
}
