//! Load balancing and failover integration tests
//!
//! Candidate order is deterministic in a fresh gateway: tenants are taken in
//! name order, so the first request for a model starts at tenant A.

use std::time::Duration;

use axum::http::StatusCode;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use switchyard::FailoverOrder;

use crate::common::{constants::*, openai_request, TenantLayout, TestGateway};
use crate::mocks::sse_data;

fn unavailable() -> Value {
    json!({"error": {"message": "Service temporarily unavailable"}})
}

#[tokio::test]
async fn test_failover_on_server_error() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_status(TENANT_A, "gpt", 503, unavailable())
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt", "From B", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "From B");

    assert_eq!(gateway.backend.requests_to(TENANT_A, "gpt").await.len(), 1);
    assert_eq!(gateway.backend.requests_to(TENANT_B, "gpt").await.len(), 1);

    let request_id = response.header("x-request-id").to_str().unwrap().to_string();
    let facts = gateway.usage.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].tenant, TENANT_B);
    assert_eq!(facts[0].request_id, request_id);
}

#[tokio::test]
async fn test_all_candidates_fail() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_status(TENANT_A, "gpt", 503, unavailable())
        .await;
    gateway
        .backend
        .mock_status(TENANT_B, "gpt", 500, unavailable())
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "failover_exhausted");
    assert!(gateway.usage.facts().is_empty());
}

#[tokio::test]
async fn test_rate_limited_candidate_is_skipped() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_status(TENANT_A, "gpt", 429, json!({"error": {"message": "slow down"}}))
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt", "From B", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_rejected_credentials_invalidate_token() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_status(TENANT_A, "gpt", 401, json!({"error": "token expired"}))
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt", "From B", 10, 2)
        .await;

    // Rotation starts at A, B, then A again.
    for _ in 0..3 {
        let response = gateway
            .post_json("/v1/chat/completions", &openai_request(GPT, false))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    // The token of A was dropped after each rejection and fetched again.
    assert_eq!(gateway.tokens.exchanges(TENANT_A).await, 2);
    assert_eq!(gateway.tokens.exchanges(TENANT_B).await, 1);
}

#[tokio::test]
async fn test_failed_token_exchange_moves_on() {
    let gateway = TestGateway::builder().without_tokens().build().await;
    gateway.tokens.mock_token_rejected(TENANT_A).await;
    gateway.tokens.mock_token_success(TENANT_B).await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt", "From B", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(gateway.backend.requests_to(TENANT_A, "gpt").await.is_empty());
    assert_eq!(gateway.usage.facts()[0].tenant, TENANT_B);
}

#[tokio::test]
async fn test_silent_token_endpoint_moves_on() {
    let gateway = TestGateway::builder()
        .without_tokens()
        .config(|c| c.token_exchange_timeout = Duration::from_millis(200))
        .build()
        .await;
    gateway
        .tokens
        .mock_token_delayed(TENANT_A, Duration::from_secs(30))
        .await;
    gateway.tokens.mock_token_success(TENANT_B).await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt", "From B", 10, 2)
        .await;

    let request = openai_request(GPT, false);
    let call = gateway.post_json("/v1/chat/completions", &request);
    let response = tokio::time::timeout(Duration::from_secs(5), async move { call.await })
        .await
        .expect("request must not hang on a silent token endpoint");

    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(gateway.backend.requests_to(TENANT_A, "gpt").await.is_empty());
    assert_eq!(gateway.usage.facts()[0].tenant, TENANT_B);
}

#[tokio::test]
async fn test_every_token_exchange_fails() {
    let gateway = TestGateway::builder().without_tokens().build().await;
    gateway.tokens.mock_token_rejected(TENANT_A).await;
    gateway.tokens.mock_token_rejected(TENANT_B).await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "upstream_auth_failed");
}

#[tokio::test]
async fn test_stream_without_first_chunk_fails_over() {
    let gateway = TestGateway::start().await;
    gateway.backend.mock_empty_stream(TENANT_A, "claude").await;
    gateway
        .backend
        .mock_anthropic_stream(TENANT_B, "claude", &["From ", "B"])
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(CLAUDE, true))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let content: String = sse_data(&response.text())
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "From B");
    assert_eq!(gateway.usage.facts()[0].tenant, TENANT_B);
}

#[tokio::test]
async fn test_round_robin_across_tenants() {
    let gateway = TestGateway::start().await;
    gateway
        .backend
        .mock_openai_chat(TENANT_A, "gpt", "From A", 10, 2)
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt", "From B", 10, 2)
        .await;

    for _ in 0..4 {
        let response = gateway
            .post_json("/v1/chat/completions", &openai_request(GPT, false))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    assert_eq!(gateway.backend.requests_to(TENANT_A, "gpt").await.len(), 2);
    assert_eq!(gateway.backend.requests_to(TENANT_B, "gpt").await.len(), 2);

    let tenants: Vec<String> = gateway.usage.facts().into_iter().map(|f| f.tenant).collect();
    assert_eq!(tenants, vec![TENANT_A, TENANT_B, TENANT_A, TENANT_B]);
}

fn two_deployments_on_a() -> Vec<TenantLayout> {
    vec![
        TenantLayout {
            name: TENANT_A,
            models: vec![(GPT, vec!["gpt1", "gpt2"])],
        },
        TenantLayout {
            name: TENANT_B,
            models: vec![(GPT, vec!["gpt1"])],
        },
    ]
}

#[tokio::test]
async fn test_tenant_first_stays_on_tenant() {
    let gateway = TestGateway::builder()
        .layout(two_deployments_on_a())
        .failover_order(FailoverOrder::TenantFirst)
        .build()
        .await;
    gateway
        .backend
        .mock_status(TENANT_A, "gpt1", 503, unavailable())
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_A, "gpt2", "From A2", 10, 2)
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt1", "From B1", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "From A2");
    assert!(gateway.backend.requests_to(TENANT_B, "gpt1").await.is_empty());
}

#[tokio::test]
async fn test_interleave_moves_to_next_tenant() {
    let gateway = TestGateway::builder()
        .layout(two_deployments_on_a())
        .failover_order(FailoverOrder::Interleave)
        .build()
        .await;
    gateway
        .backend
        .mock_status(TENANT_A, "gpt1", 503, unavailable())
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_A, "gpt2", "From A2", 10, 2)
        .await;
    gateway
        .backend
        .mock_openai_chat(TENANT_B, "gpt1", "From B1", 10, 2)
        .await;

    let response = gateway
        .post_json("/v1/chat/completions", &openai_request(GPT, false))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "From B1");
    assert!(gateway.backend.requests_to(TENANT_A, "gpt2").await.is_empty());
}

#[tokio::test]
async fn test_saturated_pool_answers_503() {
    let gateway = TestGateway::builder()
        .config(|c| {
            c.pool_max_concurrent = 1;
            c.pool_acquire_timeout = Duration::from_millis(100);
        })
        .build()
        .await;
    for tenant in [TENANT_A, TENANT_B] {
        gateway
            .backend
            .mock_openai_chat_slow(tenant, "gpt", Duration::from_secs(1))
            .await;
    }

    let request = openai_request(GPT, false);
    let calls = (0..2).map(|_| {
        let call = gateway.post_json("/v1/chat/completions", &request);
        async move { call.await }
    });
    let mut statuses: Vec<u16> = join_all(calls)
        .await
        .iter()
        .map(|r| r.status_code().as_u16())
        .collect();
    statuses.sort_unstable();

    assert_eq!(statuses, vec![200, 503]);
    assert_eq!(gateway.usage.facts().len(), 1);
}
