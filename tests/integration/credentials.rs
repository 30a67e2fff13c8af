//! Token exchange integration tests

use std::time::Duration;

use axum::http::StatusCode;
use futures::future::join_all;

use crate::common::{constants::*, openai_request, TenantLayout, TestGateway};

fn single_tenant() -> Vec<TenantLayout> {
    vec![TenantLayout {
        name: TENANT_A,
        models: vec![(GPT, vec!["gpt"])],
    }]
}

#[tokio::test]
async fn test_concurrent_requests_share_one_exchange() {
    let gateway = TestGateway::builder()
        .layout(single_tenant())
        .without_tokens()
        .build()
        .await;
    gateway
        .tokens
        .mock_token_delayed(TENANT_A, Duration::from_millis(200))
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_A, "gpt", "Hello!", 10, 2)
        .await;

    let request = openai_request(GPT, false);
    let calls = (0..10).map(|_| {
        let call = gateway.post_json("/v1/chat/completions", &request);
        async move { call.await }
    });
    let responses = join_all(calls).await;

    assert!(responses
        .iter()
        .all(|r| r.status_code() == StatusCode::OK));
    assert_eq!(gateway.tokens.exchanges(TENANT_A).await, 1);
    assert_eq!(gateway.usage.facts().len(), 10);
}

#[tokio::test]
async fn test_token_is_reused_across_requests() {
    let gateway = TestGateway::builder()
        .layout(single_tenant())
        .build()
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_A, "gpt", "Hello!", 10, 2)
        .await;

    for _ in 0..3 {
        let response = gateway
            .post_json("/v1/chat/completions", &openai_request(GPT, false))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    assert_eq!(gateway.tokens.exchanges(TENANT_A).await, 1);
}

#[tokio::test]
async fn test_rejected_exchange_is_reported() {
    let gateway = TestGateway::builder()
        .layout(single_tenant())
        .without_tokens()
        .build()
        .await;
    gateway.tokens.mock_token_rejected(TENANT_A).await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "upstream_auth_failed");
    assert!(gateway.backend.requests_to(TENANT_A, "gpt").await.is_empty());
}
