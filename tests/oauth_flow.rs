// ABOUTME: End-to-end authorization-code flow tests through the HTTP router
// ABOUTME: Covers PKCE, code single-use, refresh rotation, audience stamping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

mod common;

use axum::http::{header, StatusCode};
use base64::{engine::general_purpose, Engine as _};
use common::*;
use ledgergate::models::EntityStatus;
use serde_json::json;
use sha2::{Digest, Sha256};

const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const REDIRECT: &str = "https://app.example.com/cb";

fn challenge() -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(VERIFIER.as_bytes()))
}

fn authorize_uri(client_id: &str, resource: Option<&str>) -> String {
    let mut query = vec![
        ("response_type", "code".to_owned()),
        ("client_id", client_id.to_owned()),
        ("redirect_uri", REDIRECT.to_owned()),
        ("scope", "items:read".to_owned()),
        ("state", "xyz".to_owned()),
        ("code_challenge", challenge()),
        ("code_challenge_method", "S256".to_owned()),
    ];
    if let Some(resource) = resource {
        query.push(("resource", resource.to_owned()));
    }
    format!(
        "/oauth/authorize?{}",
        serde_urlencoded::to_string(query).unwrap()
    )
}

fn code_from_location(location: &str) -> String {
    let url = url::Url::parse(location).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn authorization_code_flow_with_pkce() {
    let state = test_state().await;
    let client = seed_client(&state, "pub-client", REDIRECT, true, true).await;
    let (_, bearer) = seed_user_token(&state, None).await;

    let response = send(
        app(&state),
        get_authed(
            &authorize_uri(&client.id, Some("https://api.example.com")),
            &bearer,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(location.starts_with(REDIRECT));
    assert!(location.contains("state=xyz"));
    let code = code_from_location(&location);

    let token_body = expect_json(
        app(&state),
        post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", REDIRECT),
                ("client_id", &client.id),
                ("code_verifier", VERIFIER),
            ],
        ),
        StatusCode::OK,
    )
    .await;

    assert_eq!(token_body["token_type"], "Bearer");
    assert_eq!(token_body["scope"], "items:read");
    assert!(token_body["refresh_token"].is_string());

    // Audience captured at authorization time is frozen into the token
    let issued = state
        .database
        .find_access_token_by_id(token_body["access_token"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(issued.audience.as_deref(), Some("https://api.example.com"));

    // Codes are single-use: the second redemption fails
    let replay = expect_json(
        app(&state),
        post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", REDIRECT),
                ("client_id", &client.id),
                ("code_verifier", VERIFIER),
            ],
        ),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(replay["error"], "invalid_grant");
}

#[tokio::test]
async fn public_client_without_verifier_is_rejected_before_code_lookup() {
    let state = test_state().await;
    let client = seed_client(&state, "pub-client", REDIRECT, true, true).await;

    let body = expect_json(
        app(&state),
        post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", "whatever"),
                ("redirect_uri", REDIRECT),
                ("client_id", &client.id),
            ],
        ),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn refresh_rotation_revokes_the_old_pair() {
    let state = test_state().await;
    let client = seed_client(&state, "pub-client", REDIRECT, true, true).await;
    let (_, bearer) = seed_user_token(&state, None).await;

    let response = send(
        app(&state),
        get_authed(&authorize_uri(&client.id, None), &bearer),
    )
    .await;
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    let code = code_from_location(&location);

    let first = expect_json(
        app(&state),
        post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", REDIRECT),
                ("client_id", &client.id),
                ("code_verifier", VERIFIER),
            ],
        ),
        StatusCode::OK,
    )
    .await;
    let old_access = first["access_token"].as_str().unwrap().to_owned();
    let refresh = first["refresh_token"].as_str().unwrap().to_owned();

    let second = expect_json(
        app(&state),
        post_form(
            "/oauth/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh),
                ("client_id", &client.id),
            ],
        ),
        StatusCode::OK,
    )
    .await;
    assert_ne!(second["access_token"], first["access_token"]);

    // The rotated-out pair is dead
    assert!(state
        .database
        .is_access_token_revoked(&old_access)
        .await
        .unwrap());
    let old_refresh = state
        .database
        .find_refresh_token_for_access_token(&old_access)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old_refresh.id, refresh);
    assert_eq!(old_refresh.status, EntityStatus::Revoked);
    let reuse = expect_json(
        app(&state),
        post_form(
            "/oauth/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh),
                ("client_id", &client.id),
            ],
        ),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(reuse["error"], "invalid_grant");
}

#[tokio::test]
async fn consent_flow_approval_and_denial() {
    let state = test_state().await;
    let client = seed_client(&state, "consent-client", REDIRECT, true, false).await;
    let (_, bearer) = seed_user_token(&state, None).await;

    let prompt = expect_json(
        app(&state),
        get_authed(&authorize_uri(&client.id, None), &bearer),
        StatusCode::OK,
    )
    .await;
    assert_eq!(prompt["client_id"], client.id.as_str());
    assert!(prompt["scopes"][0]["description"].is_string());
    let session_id = prompt["session_id"].as_str().unwrap().to_owned();
    let confirmation = prompt["confirmation_token"].as_str().unwrap().to_owned();

    let approved = send(
        app(&state),
        post_form(
            "/oauth/authorize",
            &[
                ("session_id", session_id.as_str()),
                ("confirmation_token", confirmation.as_str()),
            ],
        ),
    )
    .await;
    assert_eq!(approved.status(), StatusCode::SEE_OTHER);
    let location = approved
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.contains("code="));

    // Replaying the settled session fails authentication
    let replay = send(
        app(&state),
        post_form(
            "/oauth/authorize",
            &[
                ("session_id", session_id.as_str()),
                ("confirmation_token", confirmation.as_str()),
            ],
        ),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    // Denial settles with an access_denied redirect
    let prompt = expect_json(
        app(&state),
        get_authed(&authorize_uri(&client.id, None), &bearer),
        StatusCode::OK,
    )
    .await;
    let denied = send(
        app(&state),
        axum::http::Request::builder()
            .method("DELETE")
            .uri("/oauth/authorize")
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(axum::body::Body::from(
                serde_urlencoded::to_string([
                    ("session_id", prompt["session_id"].as_str().unwrap()),
                    (
                        "confirmation_token",
                        prompt["confirmation_token"].as_str().unwrap(),
                    ),
                ])
                .unwrap(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(denied.status(), StatusCode::SEE_OTHER);
    let location = denied
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.contains("error=access_denied"));
}

#[tokio::test]
async fn introspection_reports_issued_token_state() {
    let state = test_state().await;
    let client = seed_client(&state, "conf-client", REDIRECT, false, true).await;
    let (_, bearer) = seed_user_token(&state, None).await;

    let response = send(
        app(&state),
        get_authed(&authorize_uri(&client.id, None), &bearer),
    )
    .await;
    let code = code_from_location(
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap(),
    );

    let token = expect_json(
        app(&state),
        post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", REDIRECT),
                ("client_id", &client.id),
                ("client_secret", "plain-secret"),
                ("code_verifier", VERIFIER),
            ],
        ),
        StatusCode::OK,
    )
    .await;
    let access = token["access_token"].as_str().unwrap().to_owned();

    let introspection = expect_json(
        app(&state),
        post_form(
            "/oauth/introspect",
            &[
                ("token", access.as_str()),
                ("client_id", &client.id),
                ("client_secret", "plain-secret"),
            ],
        ),
        StatusCode::OK,
    )
    .await;
    assert_eq!(introspection["active"], json!(true));
    assert_eq!(introspection["client_id"], client.id.as_str());

    // Revocation flips it to inactive
    send(
        app(&state),
        post_form(
            "/oauth/revoke",
            &[
                ("token", access.as_str()),
                ("client_id", &client.id),
                ("client_secret", "plain-secret"),
            ],
        ),
    )
    .await;
    let after = expect_json(
        app(&state),
        post_form(
            "/oauth/introspect",
            &[
                ("token", access.as_str()),
                ("client_id", &client.id),
                ("client_secret", "plain-secret"),
            ],
        ),
        StatusCode::OK,
    )
    .await;
    assert_eq!(after["active"], json!(false));
}
