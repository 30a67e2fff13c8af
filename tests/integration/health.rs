//! Health and metrics endpoint integration tests

use axum::http::StatusCode;
use serde_json::Value;

use crate::common::{constants::GPT, openai_request, TestGateway};

#[tokio::test]
async fn test_health_check() {
    let gateway = TestGateway::start().await;

    let response = gateway.server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["models"], 4);
    assert_eq!(body["tenants"], 2);
    assert_eq!(body["in_flight"], 0);
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_health_does_not_need_auth_or_backends() {
    let gateway = TestGateway::builder().without_tokens().build().await;

    let response = gateway.server.get("/health/live").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(gateway.tokens.exchanges("tenant-a").await, 0);
    assert!(gateway.backend.requests_to("tenant-a", "gpt").await.is_empty());
}

#[tokio::test]
async fn test_metrics_after_request() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_openai_chat("tenant-a", "gpt", "Hello!", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let metrics = gateway.server.get("/metrics").await;
    assert_eq!(metrics.status_code(), StatusCode::OK);
    let text = metrics.text();
    assert!(text.contains("switchyard_requests_total"));
    assert!(text.contains("switchyard_tokens_total"));
}
