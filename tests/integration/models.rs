//! Models endpoint integration tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::Value;

use crate::common::{constants::*, TestGateway};

#[tokio::test]
async fn test_list_models() {
    let gateway = TestGateway::start().await;

    let response = gateway.get("/v1/models").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["object"], "list");

    let data = body["data"].as_array().unwrap();
    let listed: Vec<(&str, &str)> = data
        .iter()
        .map(|m| (m["id"].as_str().unwrap(), m["owned_by"].as_str().unwrap()))
        .collect();
    assert_eq!(
        listed,
        vec![
            (CLAUDE, "anthropic"),
            (GEMINI, "gemini"),
            (GPT, "openai"),
            (EMBEDDING, "openai"),
        ]
    );
    assert!(data.iter().all(|m| m["object"] == "model" && m["created"].is_i64()));
}

#[tokio::test]
async fn test_get_model() {
    let gateway = TestGateway::start().await;

    let response = gateway.get("/v1/models/gpt-4o").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["id"], GPT);
    assert_eq!(body["owned_by"], "openai");
}

#[tokio::test]
async fn test_get_unknown_model() {
    let gateway = TestGateway::start().await;

    let response = gateway.get("/v1/models/gpt-9").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "model_not_found");
}

#[tokio::test]
async fn test_models_require_auth() {
    let gateway = TestGateway::start().await;

    let response = gateway.server.get("/v1/models").await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}
