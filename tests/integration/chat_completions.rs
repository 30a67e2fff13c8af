//! OpenAI-format chat completion integration tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{constants::*, openai_request, TestGateway};
use crate::mocks::sse_data;

#[tokio::test]
async fn test_chat_completion_passthrough() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_openai_chat(TENANT_A, "gpt", "Hello!", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let request_id = response
        .header("x-request-id")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(request_id.len(), 8);

    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "Hello!");
    assert_eq!(body["usage"]["total_tokens"], 12);

    let upstream = gateway.backend.last_body(TENANT_A, "gpt").await.unwrap();
    assert_eq!(upstream["model"], GPT);
    assert!(upstream.get("stream").is_none());
    assert_eq!(upstream["messages"].as_array().unwrap().len(), 2);

    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].request_id, request_id);
    assert_eq!(facts[0].tenant, TENANT_A);
    assert_eq!(facts[0].model, GPT);
    assert_eq!((facts[0].prompt_tokens, facts[0].completion_tokens), (10, 2));
    assert!(!facts[0].streamed);
}

#[tokio::test]
async fn test_chat_completion_stream_passthrough() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_openai_stream(TENANT_A, "gpt", &["Hel", "lo"])
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, true))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response
        .header("content-type")
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = response.text();
    let content: String = sse_data(&text)
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "Hello");
    assert_eq!(text.matches("data: [DONE]").count(), 1);

    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!((facts[0].prompt_tokens, facts[0].completion_tokens), (9, 2));
    assert!(facts[0].streamed);
}

#[tokio::test]
async fn test_chat_completion_stream_from_anthropic_backend() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_anthropic_stream(TENANT_A, "claude", &["Hel", "lo"])
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(CLAUDE, true))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let text = response.text();
    let chunks = sse_data(&text);

    let content: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "Hello");
    assert!(chunks
        .iter()
        .all(|c| c["object"] == "chat.completion.chunk"));
    assert!(chunks
        .iter()
        .any(|c| c["choices"][0]["finish_reason"] == "stop"));
    assert_eq!(text.matches("data: [DONE]").count(), 1);

    let upstream = gateway.backend.last_body(TENANT_A, "claude").await.unwrap();
    assert_eq!(upstream["anthropic_version"], "bedrock-2023-05-31");
    assert_eq!(upstream["system"], "You are terse.");
    assert!(upstream.get("model").is_none());

    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!((facts[0].prompt_tokens, facts[0].completion_tokens), (21, 7));
    assert!(facts[0].streamed);
}

#[tokio::test]
async fn test_chat_completion_from_anthropic_backend() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_anthropic_invoke(TENANT_A, "claude", "Hi there")
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(CLAUDE, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], CLAUDE);
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["prompt_tokens"], 21);
    assert_eq!(body["usage"]["completion_tokens"], 7);
}

#[tokio::test]
async fn test_unknown_model() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request("gpt-9", false))
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "model_not_found");
    assert_eq!(response.header("x-request-id").len(), 8);
    assert!(gateway.usage.facts().is_empty());
}

#[tokio::test]
async fn test_upstream_validation_error_is_not_retried() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_status(
            TENANT_A,
            "gpt",
            400,
            json!({"error": {"message": "max_tokens is too large"}}),
        )
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt", "unused", 1, 1)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "upstream_rejected");
    assert!(gateway.backend.requests_to(TENANT_B, "gpt").await.is_empty());
    assert!(gateway.usage.facts().is_empty());
}

#[tokio::test]
async fn test_invalid_json_body() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .server
        .post("/v1/chat/completions")
        .add_header(
            axum::http::HeaderName::from_static("authorization"),
            axum::http::HeaderValue::from_static("Bearer sk-test-caller"),
        )
        .content_type("application/json")
        .bytes("{not json".into())
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_json");
}

#[tokio::test]
async fn test_missing_messages() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .post_json("/v1/chat/completions", &json!({"model": GPT}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_usage_fact_is_priced() {
    let gateway = TestGateway::builder()
        .file_entry(
            "pricing",
            json!({GPT: {"input_per_million": 1_000_000.0, "output_per_million": 2_000_000.0}}),
        )
        .build()
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_A, "gpt", "Hello!", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert!((facts[0].cost - 14.0).abs() < 1e-9);
}
