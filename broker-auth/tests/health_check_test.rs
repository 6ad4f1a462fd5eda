mod common;

use axum::http::StatusCode;
use common::TestApp;

#[tokio::test]
async fn test_health_check_reports_both_stores() {
    let app = TestApp::spawn();

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["store"], "up");
    assert_eq!(body["checks"]["revocations"], "up");
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = TestApp::spawn();

    let request = axum::http::Request::builder()
        .uri("/health")
        .header("x-request-id", "req-7")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-7");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = TestApp::spawn();
    let (status, _) = app.get("/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
