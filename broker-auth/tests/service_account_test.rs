mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_create_and_list_accounts() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;
    let service_id = Uuid::new_v4();

    let (status, body) = app
        .post(
            &format!("/services/{}/accounts", service_id),
            Some(&broker.access_token),
            json!({ "login": "trader", "secret": "s3cret" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["serviceId"], service_id.to_string());
    assert!(body.get("secret").is_none());

    let (status, body) = app.get("/accounts", Some(&broker.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_service_account_conflicts() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;
    let uri = format!("/services/{}/accounts", Uuid::new_v4());
    let body = json!({ "login": "trader", "secret": "s3cret" });

    let (status, _) = app.post(&uri, Some(&broker.access_token), body.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, response) = app.post(&uri, Some(&broker.access_token), body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(response["error"], "DuplicateAccount");
}

#[tokio::test]
async fn test_client_sees_account_only_with_permission() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;
    let account = app.open_account(&broker).await;
    let client = app.active_client(&broker, "c@x.com").await;
    let uri = format!("/accounts/{}", account);

    let (status, body) = app.get(&uri, Some(&client.access_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "InsufficientPermission");

    let (status, body) = app.get("/accounts", Some(&client.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    app.state
        .permissions
        .set_can_trade(broker.id, account, client.id, true)
        .await
        .unwrap();

    let (status, body) = app.get(&uri, Some(&client.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], account.to_string());
}

#[tokio::test]
async fn test_only_owner_reads_and_updates_account() {
    let app = TestApp::spawn();
    let owner = app.active_broker("owner@x.com").await;
    let other = app.active_broker("other@x.com").await;
    let account = app.open_account(&owner).await;
    let uri = format!("/accounts/{}", account);

    let (status, _) = app.get(&uri, Some(&owner.access_token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get(&uri, Some(&other.access_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "InsufficientPermission");

    let update = json!({ "login": "new-login", "secret": "new-secret" });
    let (status, _) = app.patch(&uri, Some(&other.access_token), update.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.patch(&uri, Some(&owner.access_token), update).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["id"], account.to_string());
}

#[tokio::test]
async fn test_missing_account_is_not_found() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;

    let (status, body) = app
        .get(&format!("/accounts/{}", Uuid::new_v4()), Some(&broker.access_token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn test_delete_cascades_permissions() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;
    let account = app.open_account(&broker).await;
    app.active_client(&broker, "c@x.com").await;
    assert_eq!(app.permission_rows(account).await.len(), 1);

    let uri = format!("/accounts/{}", account);
    let (status, _) = app.delete(&uri, Some(&broker.access_token)).await;
    assert_eq!(status, StatusCode::OK);

    assert!(app.permission_rows(account).await.is_empty());
    let (status, _) = app.get(&uri, Some(&broker.access_token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clients_cannot_open_accounts() {
    let app = TestApp::spawn();
    let broker = app.active_broker("b@x.com").await;
    let client = app.active_client(&broker, "c@x.com").await;

    let (status, body) = app
        .post(
            &format!("/services/{}/accounts", Uuid::new_v4()),
            Some(&client.access_token),
            json!({ "login": "l", "secret": "s" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "InsufficientPermission");
}
