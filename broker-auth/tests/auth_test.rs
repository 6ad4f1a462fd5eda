mod common;

use axum::http::StatusCode;
use broker_auth::services::{EmailKind, RevocationStore, REGISTRATION_ACK};
use common::{TestApp, PASSWORD};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_broker_registration_sends_verification_link() {
    let app = TestApp::spawn();

    let (status, body) = app.register_broker("b@x.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], REGISTRATION_ACK);

    let link = app
        .mailbox
        .last_link("b@x.com", EmailKind::Verification)
        .expect("verification mail");
    assert!(link.starts_with("http://frontend.test/verify-email?data="));
}

#[tokio::test]
async fn test_login_before_verification_is_rejected() {
    let app = TestApp::spawn();
    app.register_broker("b@x.com").await;

    let (status, body) = app.login("b@x.com", PASSWORD, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AccountNotActive");
}

#[tokio::test]
async fn test_verified_broker_logs_in_with_role() {
    let app = TestApp::spawn();
    app.register_broker("b@x.com").await;

    let (status, _) = app.verify_email("b@x.com").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.login("B@X.com", PASSWORD, None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["userRole"], "BROKER");
    assert!(body["accessToken"].is_string());
    assert!(body["refreshToken"].is_string());
}

#[tokio::test]
async fn test_verification_link_is_single_use() {
    let app = TestApp::spawn();
    app.register_broker("b@x.com").await;

    let (status, _) = app.verify_email("b@x.com").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.verify_email("b@x.com").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "CredentialRevoked");
}

#[tokio::test]
async fn test_concurrent_verification_clicks_spend_the_link_once() {
    let app = TestApp::with_revocation_latency(Duration::from_millis(20));
    app.register_broker("b@x.com").await;

    let (first, second) = tokio::join!(app.verify_email("b@x.com"), app.verify_email("b@x.com"));

    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::FORBIDDEN]);
    let (status, _) = app.login("b@x.com", PASSWORD, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_registering_active_email_is_rejected() {
    let app = TestApp::spawn();
    app.active_broker("b@x.com").await;

    let (status, body) = app.register_broker("b@x.com").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "EmailTaken");
}

#[tokio::test]
async fn test_unconfirmed_registration_is_reused() {
    let app = TestApp::spawn();
    app.register_broker("b@x.com").await;
    let first = app.mailed_token("b@x.com", EmailKind::Verification);

    let (status, body) = app.register_broker("b@x.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], REGISTRATION_ACK);

    let second = app.mailed_token("b@x.com", EmailKind::Verification);
    assert_ne!(first, second);
    assert_eq!(app.mailbox.sent().len(), 2);

    // Both links point at the same identity; either activates it.
    let (status, _) = app
        .patch("/verify-email", None, json!({ "emailToken": first }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.login("b@x.com", PASSWORD, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_email_is_unique_across_brokers_and_clients() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;
    let invite = app.invite_token(&broker).await;

    let (status, body) = app.register_client(&invite, "b@x.com").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "DuplicateIdentity");
}

#[tokio::test]
async fn test_unknown_email_and_wrong_password_are_indistinguishable() {
    let app = TestApp::spawn();
    app.active_broker("b@x.com").await;

    let (unknown_status, unknown_body) = app.login("nobody@x.com", PASSWORD, None).await;
    let (wrong_status, wrong_body) = app.login("b@x.com", "not-the-password", None).await;

    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, wrong_status);
    assert_eq!(unknown_body, wrong_body);
    assert_eq!(unknown_body["error"], "InvalidCredentials");
}

#[tokio::test]
async fn test_public_key_selects_client_login() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;

    // A broker presenting a public key is looked up among clients.
    let (status, body) = app.login("b@x.com", PASSWORD, Some("pk")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "InvalidCredentials");

    let client = app.active_client(&broker, "c@x.com").await;
    let stored = app.revocations.public_key(&client.id).await.unwrap();
    assert_eq!(stored.as_deref(), Some("client-public-key"));

    // And a client without one is looked up among brokers.
    let (status, _) = app.login("c@x.com", PASSWORD, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_client_registration_requires_invite_token() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;

    // An access token is not an invite.
    let (status, body) = app
        .register_client(&broker.access_token, "c@x.com")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "WrongTokenType");

    let (status, body) = app.register_client("garbage", "c@x.com").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "InvalidCredential");
}

#[tokio::test]
async fn test_registration_validation_errors() {
    let app = TestApp::spawn();

    let (status, body) = app
        .post(
            "/brokers/register",
            None,
            json!({
                "email": "not-an-email",
                "password": "short",
                "firstName": "B",
                "lastName": "R",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "ValidationError");

    let (status, body) = app.post("/brokers/register", None, json!({ "email": 1 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
}
