//! Caller authentication integration tests
//!
//! Rejections use the error shape of the endpoint being called.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde_json::Value;

use crate::common::{
    anthropic_request, constants::*, gemini_request, openai_request, TestGateway,
};

#[tokio::test]
async fn test_missing_token_openai_shape() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .server
        .post("/v1/chat/completions")
        .json(&openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "authentication_error");
    assert_eq!(body["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn test_wrong_token_anthropic_shape() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .server
        .post("/v1/messages")
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("sk-wrong"),
        )
        .json(&anthropic_request(CLAUDE, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn test_missing_token_gemini_shape() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .server
        .post("/v1beta/models/gemini-2.5-pro:generateContent")
        .json(&gemini_request())
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], 401);
    assert_eq!(body["error"]["status"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_x_api_key_accepted() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .server
        .get("/v1/models")
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static(CALLER_TOKEN),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_rejected_caller_reaches_no_backend() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .server
        .post("/v1/chat/completions")
        .add_header(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("Bearer sk-wrong"),
        )
        .json(&openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(gateway.tokens.exchanges(TENANT_A).await, 0);
    assert!(gateway.backend.requests_to(TENANT_A, "gpt").await.is_empty());
}
