// ABOUTME: Storage-level guarantees: revocation semantics, catalog defaults
// ABOUTME: Also exercises tenant scoping of token listing and revocation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

mod common;

use axum::http::{header, StatusCode};
use chrono::{Duration, Utc};
use common::*;
use ledgergate::database::Database;
use ledgergate::models::{
    AccessToken, EntityStatus, OAuthClient, Provenance, ScopeDefinition, Tenant,
};
use uuid::Uuid;

fn scope_definition(key: &str, is_default: bool) -> ScopeDefinition {
    ScopeDefinition {
        key: key.to_owned(),
        name: key.to_owned(),
        description: None,
        group: None,
        enabled: true,
        is_default,
        sort_order: 0,
        created_by: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn saving_a_new_default_scope_demotes_the_old_one() {
    let state = test_state().await;
    let db = &state.database;

    db.save_scope_definition(&scope_definition("sales:read", true))
        .await
        .unwrap();
    db.save_scope_definition(&scope_definition("banking:read", true))
        .await
        .unwrap();

    let definitions = db.list_scope_definitions(false).await.unwrap();
    let defaults: Vec<_> = definitions.iter().filter(|d| d.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].key, "banking:read");
}

#[tokio::test]
async fn malformed_scope_keys_are_rejected() {
    let state = test_state().await;
    let result = state
        .database
        .save_scope_definition(&scope_definition("Sales Read!", false))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn revocation_checks_fail_closed_for_unknown_ids() {
    let state = test_state().await;
    let db = &state.database;

    assert!(db.is_client_revoked("no-such-client").await.unwrap());
    assert!(db.is_access_token_revoked("no-such-token").await.unwrap());
    assert!(db.is_refresh_token_revoked("no-such-refresh").await.unwrap());
    assert!(db.is_auth_code_revoked("no-such-code").await.unwrap());
}

#[tokio::test]
async fn revoking_a_token_preserves_its_tenant_stamp() {
    let state = test_state().await;
    let tenant = seed_tenant(&state, "Acme").await;
    let (_, token_id) = seed_user_token(&state, Some(tenant)).await;

    state
        .database
        .revoke_access_token_by_id(&token_id)
        .await
        .unwrap();

    let token = state
        .database
        .find_access_token_by_id(&token_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token.status, EntityStatus::Revoked);
    assert_eq!(token.tenant_id, Some(tenant));
}

#[tokio::test]
async fn token_listing_is_scoped_to_the_callers_tenant() {
    let state = test_state().await;
    let acme = seed_tenant(&state, "Acme").await;
    let globex = seed_tenant(&state, "Globex").await;
    let (user_id, bearer) = seed_user_token(&state, Some(acme)).await;

    // Same user holds a token stamped with the other tenant
    let now = Utc::now();
    state
        .database
        .create_access_token(&AccessToken {
            id: "tok-globex".to_owned(),
            tenant_id: Some(globex),
            user_id: Some(user_id),
            client_id: "seed-client".to_owned(),
            scopes: vec![],
            audience: None,
            status: EntityStatus::Active,
            created_from: None,
            expires_at: now + Duration::hours(1),
            created_at: now,
        })
        .await
        .unwrap();

    let listed = expect_json(
        app(&state),
        get_authed("/oauth/tokens", &bearer),
        StatusCode::OK,
    )
    .await;
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&bearer.as_str()));
    assert!(!ids.contains(&"tok-globex"));
}

#[tokio::test]
async fn cross_tenant_revocation_is_refused() {
    let state = test_state().await;
    let acme = seed_tenant(&state, "Acme").await;
    let globex = seed_tenant(&state, "Globex").await;
    let (user_id, bearer) = seed_user_token(&state, Some(acme)).await;

    let now = Utc::now();
    state
        .database
        .create_access_token(&AccessToken {
            id: "tok-globex".to_owned(),
            tenant_id: Some(globex),
            user_id: Some(user_id),
            client_id: "seed-client".to_owned(),
            scopes: vec![],
            audience: None,
            status: EntityStatus::Active,
            created_from: None,
            expires_at: now + Duration::hours(1),
            created_at: now,
        })
        .await
        .unwrap();

    let response = send(
        app(&state),
        axum::http::Request::builder()
            .method("DELETE")
            .uri("/oauth/tokens/tok-globex")
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The foreign token is untouched
    let target = state
        .database
        .find_access_token_by_id("tok-globex")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(target.status, EntityStatus::Active);
}

#[tokio::test]
async fn own_tenant_revocation_succeeds() {
    let state = test_state().await;
    let acme = seed_tenant(&state, "Acme").await;
    let (user_id, bearer) = seed_user_token(&state, Some(acme)).await;

    let now = Utc::now();
    state
        .database
        .create_access_token(&AccessToken {
            id: "tok-own".to_owned(),
            tenant_id: Some(acme),
            user_id: Some(user_id),
            client_id: "seed-client".to_owned(),
            scopes: vec![],
            audience: None,
            status: EntityStatus::Active,
            created_from: None,
            expires_at: now + Duration::hours(1),
            created_at: now,
        })
        .await
        .unwrap();

    let response = send(
        app(&state),
        axum::http::Request::builder()
            .method("DELETE")
            .uri("/oauth/tokens/tok-own")
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(state
        .database
        .is_access_token_revoked("tok-own")
        .await
        .unwrap());
}

fn tenant_client(id: &str, tenant_id: Uuid) -> OAuthClient {
    let now = Utc::now();
    OAuthClient {
        id: id.to_owned(),
        tenant_id: Some(tenant_id),
        user_id: None,
        name: format!("Client {id}"),
        secret: None,
        redirect_uris: vec!["https://app.example.com/cb".to_owned()],
        personal_access_client: false,
        password_client: false,
        skip_authorization: false,
        status: EntityStatus::Active,
        provenance: Provenance {
            created_from: Some("test".to_owned()),
            created_by: None,
            provider: None,
        },
        registration_token_hash: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn client_listing_is_scoped_to_one_tenant() {
    let state = test_state().await;
    let acme = seed_tenant(&state, "Acme").await;
    let globex = seed_tenant(&state, "Globex").await;
    let db = &state.database;

    db.create_client(&tenant_client("acme-app", acme)).await.unwrap();
    db.create_client(&tenant_client("globex-app", globex)).await.unwrap();
    db.create_client(&tenant_client("acme-gone", acme)).await.unwrap();
    db.soft_delete_client("acme-gone").await.unwrap();

    let listed = db.list_clients_for_tenant(acme).await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["acme-app"]);
}

#[tokio::test]
async fn deleting_a_scope_definition_empties_the_catalog_entry() {
    let state = test_state().await;
    let db = &state.database;

    db.save_scope_definition(&scope_definition("reports:read", false))
        .await
        .unwrap();

    assert_eq!(db.delete_scope_definition("reports:read").await.unwrap(), 1);
    assert!(db.get_scope_definition("reports:read").await.unwrap().is_none());
    // Deleting again is a no-op
    assert_eq!(db.delete_scope_definition("reports:read").await.unwrap(), 0);
}

#[tokio::test]
async fn tenant_activity_feed_records_own_tenant_revocations() {
    let state = test_state().await;
    let acme = seed_tenant(&state, "Acme").await;
    let (user_id, bearer) = seed_user_token(&state, Some(acme)).await;

    let now = Utc::now();
    state
        .database
        .create_access_token(&AccessToken {
            id: "tok-own".to_owned(),
            tenant_id: Some(acme),
            user_id: Some(user_id),
            client_id: "seed-client".to_owned(),
            scopes: vec![],
            audience: None,
            status: EntityStatus::Active,
            created_from: None,
            expires_at: now + Duration::hours(1),
            created_at: now,
        })
        .await
        .unwrap();

    let response = send(
        app(&state),
        axum::http::Request::builder()
            .method("DELETE")
            .uri("/oauth/tokens/tok-own")
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let feed = state
        .database
        .list_activity_for_tenant(acme, 10)
        .await
        .unwrap();
    let revocation = feed
        .iter()
        .find(|e| e.event_type == "oauth.token.revoked")
        .unwrap();
    assert_eq!(revocation.tenant_id, Some(acme));
    assert_eq!(revocation.token_id.as_deref(), Some("tok-own"));
}

#[tokio::test]
async fn file_backed_database_survives_reconnection() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/ledgergate.db", dir.path().display());
    let tenant = Tenant {
        id: Uuid::new_v4(),
        name: "Acme".to_owned(),
        slug: "acme".to_owned(),
        created_at: Utc::now(),
    };

    {
        let db = Database::new(&url).await.unwrap();
        db.create_tenant(&tenant).await.unwrap();
    }

    let db = Database::new(&url).await.unwrap();
    let loaded = db.get_tenant_by_id(tenant.id).await.unwrap().unwrap();
    assert_eq!(loaded.slug, "acme");
}
