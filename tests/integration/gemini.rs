//! Google-format generateContent integration tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::Value;

use crate::common::{constants::*, gemini_request, TestGateway};
use crate::mocks::sse_data;

fn generate_path(model: &str) -> String {
    format!("/v1beta/models/{}:generateContent", model)
}

#[tokio::test]
async fn test_generate_content_passthrough() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_gemini_generate(TENANT_A, "gemini", GEMINI, "Hello!")
        .await;

    let response = gateway
        .post_json(&generate_path(GEMINI), &gemini_request())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "Hello!");
    assert_eq!(body["usageMetadata"]["promptTokenCount"], 11);

    let upstream = gateway.backend.last_body(TENANT_A, "gemini").await.unwrap();
    assert!(upstream.get("model").is_none());
    assert!(upstream.get("stream").is_none());
    assert_eq!(upstream["generationConfig"]["maxOutputTokens"], 256);

    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].model, GEMINI);
    assert_eq!((facts[0].prompt_tokens, facts[0].completion_tokens), (11, 3));
}

#[tokio::test]
async fn test_stream_generate_content_passthrough() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_gemini_stream(TENANT_A, "gemini", GEMINI, &["Hel", "lo"])
        .await;

    let response = gateway
        .post_json(
            &format!("/v1beta/models/{}:streamGenerateContent", GEMINI),
            &gemini_request(),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let text = response.text();
    let content: String = sse_data(&text)
        .iter()
        .filter_map(|c| c["candidates"][0]["content"]["parts"][0]["text"].as_str())
        .collect();
    assert_eq!(content, "Hello");
    assert!(!text.contains("[DONE]"));

    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert!(facts[0].streamed);
}

#[tokio::test]
async fn test_generate_content_on_anthropic_backend() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_anthropic_invoke(TENANT_A, "claude", "Hi there")
        .await;

    let response = gateway
        .post_json(&generate_path(CLAUDE), &gemini_request())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["candidates"][0]["content"]["role"], "model");
    assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "Hi there");
    assert_eq!(body["candidates"][0]["finishReason"], "STOP");
    assert_eq!(body["usageMetadata"]["promptTokenCount"], 21);
    assert_eq!(body["usageMetadata"]["candidatesTokenCount"], 7);

    let upstream = gateway.backend.last_body(TENANT_A, "claude").await.unwrap();
    assert_eq!(upstream["system"], "You are terse.");
    assert_eq!(upstream["max_tokens"], 256);
    assert_eq!(upstream["messages"][0]["role"], "user");
}

#[tokio::test]
async fn test_unknown_action_is_rejected() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .post_json(
            &format!("/v1beta/models/{}:countTokens", GEMINI),
            &gemini_request(),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], 400);
    assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_unknown_model_uses_google_shape() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .post_json(&generate_path("gemini-0.1"), &gemini_request())
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], "NOT_FOUND");
}
