//! Anthropic-format Messages integration tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{anthropic_request, constants::*, TestGateway};
use crate::mocks::{sse_data, sse_event_names};

#[tokio::test]
async fn test_messages_passthrough_strips_cache_control() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_anthropic_invoke(TENANT_A, "claude", "Hi there")
        .await;

    let mut request = anthropic_request(CLAUDE, false);
    request["system"] = json!([
        {"type": "text", "text": "You are terse.", "cache_control": {"type": "ephemeral"}}
    ]);
    request["metadata"] = json!({"user_id": "u-1"});

    let response = gateway.post_json("/v1/messages", &request).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["type"], "message");
    assert_eq!(body["content"][0]["text"], "Hi there");

    let upstream = gateway.backend.last_body(TENANT_A, "claude").await.unwrap();
    assert!(upstream["system"][0].get("cache_control").is_none());
    assert_eq!(upstream["system"][0]["text"], "You are terse.");
    // Fields the gateway does not interpret survive passthrough.
    assert_eq!(upstream["metadata"]["user_id"], "u-1");
    assert_eq!(upstream["max_tokens"], 256);

    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!((facts[0].prompt_tokens, facts[0].completion_tokens), (21, 7));
}

#[tokio::test]
async fn test_messages_to_openai_backend() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_openai_chat(TENANT_A, "gpt", "Hello!", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/messages", &anthropic_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Hello!");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 10);
    assert_eq!(body["usage"]["output_tokens"], 2);

    let upstream = gateway.backend.last_body(TENANT_A, "gpt").await.unwrap();
    assert_eq!(upstream["messages"][0]["role"], "system");
    assert_eq!(upstream["messages"][1]["role"], "user");
}

#[tokio::test]
async fn test_messages_stream_from_openai_backend() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_openai_stream(TENANT_A, "gpt", &["Hel", "lo"])
        .await;

    let response = gateway
        .post_json("/v1/messages", &anthropic_request(GPT, true))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let text = response.text();

    let names = sse_event_names(&text);
    assert_eq!(names.first().map(String::as_str), Some("message_start"));
    assert_eq!(names.last().map(String::as_str), Some("message_stop"));
    assert_eq!(names.iter().filter(|n| *n == "message_stop").count(), 1);
    assert!(names.iter().any(|n| n == "content_block_start"));
    assert!(names.iter().any(|n| n == "content_block_stop"));

    let events = sse_data(&text);
    let content: String = events
        .iter()
        .filter(|e| e["type"] == "content_block_delta")
        .filter_map(|e| e["delta"]["text"].as_str())
        .collect();
    assert_eq!(content, "Hello");

    let delta = events
        .iter()
        .find(|e| e["type"] == "message_delta")
        .unwrap();
    assert_eq!(delta["delta"]["stop_reason"], "end_turn");

    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!((facts[0].prompt_tokens, facts[0].completion_tokens), (9, 2));
    assert!(facts[0].streamed);
}

#[tokio::test]
async fn test_messages_stream_passthrough() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_anthropic_stream(TENANT_A, "claude", &["Hi", " there"])
        .await;

    let response = gateway
        .post_json("/v1/messages", &anthropic_request(CLAUDE, true))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let text = response.text();
    let content: String = sse_data(&text)
        .iter()
        .filter_map(|e| e["delta"]["text"].as_str())
        .collect();
    assert_eq!(content, "Hi there");
    assert_eq!(
        sse_event_names(&text)
            .iter()
            .filter(|n| *n == "message_stop")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_messages_missing_messages_is_rejected() {
    let gateway = TestGateway::start().await;

    let mut request = anthropic_request(CLAUDE, false);
    request.as_object_mut().unwrap().remove("messages");

    let response = gateway.post_json("/v1/messages", &request).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}
