//! Mock model deployments for testing
//!
//! One wiremock server hosts every deployment; a deployment named `gpt` of
//! tenant `tenant-a` lives under `{uri}/tenant-a/gpt`. Mocks only match
//! requests carrying the tenant's access token and resource group, so a
//! request routed with the wrong credentials falls through to a 404.
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = MockBackend::start().await;
//! backend.mock_openai_chat("tenant-a", "gpt", "Hello!", 10, 2).await;
//! // deployment URL: backend.deployment_url("tenant-a", "gpt")
//! ```

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::{
    matchers::{body_partial_json, header, method, path, path_regex, query_param},
    Mock, MockBuilder, MockServer, Request, ResponseTemplate,
};

use super::token_endpoint::access_token_for;

/// Resource group configured for `tenant`
pub fn resource_group_for(tenant: &str) -> String {
    format!("rg-{}", tenant)
}

/// Mock deployment host
pub struct MockBackend {
    server: MockServer,
}

impl MockBackend {
    /// Start a new mock backend server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Get the mock server URI
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Deployment URL for the configuration file
    pub fn deployment_url(&self, tenant: &str, name: &str) -> String {
        format!("{}/{}/{}", self.server.uri(), tenant, name)
    }

    fn post(tenant: &str, route: String) -> MockBuilder {
        Mock::given(method("POST"))
            .and(path(route))
            .and(header(
                "authorization",
                format!("Bearer {}", access_token_for(tenant)).as_str(),
            ))
            .and(header("ai-resource-group", resource_group_for(tenant).as_str()))
            .and(header("content-type", "application/json"))
    }

    fn sse(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }

    // =========================================================================
    // Failures
    // =========================================================================

    /// Every call to the deployment answers `status`
    pub async fn mock_status(&self, tenant: &str, name: &str, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path_regex(format!("^/{}/{}/", tenant, name)))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Every call answers 200 with headers only and an empty event stream
    pub async fn mock_empty_stream(&self, tenant: &str, name: &str) {
        Mock::given(method("POST"))
            .and(path_regex(format!("^/{}/{}/", tenant, name)))
            .respond_with(Self::sse(String::new()))
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // OpenAI family
    // =========================================================================

    /// Non-streaming chat completion
    pub async fn mock_openai_chat(
        &self,
        tenant: &str,
        name: &str,
        content: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) {
        Self::post(tenant, format!("/{}/{}/chat/completions", tenant, name))
            .and(query_param("api-version", "2024-12-01-preview"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion(
                content,
                prompt_tokens,
                completion_tokens,
            )))
            .mount(&self.server)
            .await;
    }

    /// Non-streaming chat completion answered after `delay`
    pub async fn mock_openai_chat_slow(&self, tenant: &str, name: &str, delay: Duration) {
        Self::post(tenant, format!("/{}/{}/chat/completions", tenant, name))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(openai_completion("slow", 1, 1))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Streaming chat completion with a trailing usage chunk
    pub async fn mock_openai_stream(&self, tenant: &str, name: &str, deltas: &[&str]) {
        Self::post(tenant, format!("/{}/{}/chat/completions", tenant, name))
            .and(body_partial_json(json!({
                "stream": true,
                "stream_options": {"include_usage": true}
            })))
            .respond_with(Self::sse(openai_sse(deltas, 9, deltas.len() as u64)))
            .mount(&self.server)
            .await;
    }

    /// Embeddings of one or more inputs
    pub async fn mock_embeddings(&self, tenant: &str, name: &str, prompt_tokens: u64) {
        Self::post(tenant, format!("/{}/{}/embeddings", tenant, name))
            .and(query_param("api-version", "2023-05-15"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"object": "embedding", "index": 0, "embedding": [0.1, -0.2, 0.3]}],
                "model": "text-embedding-3-small",
                "usage": {"prompt_tokens": prompt_tokens, "total_tokens": prompt_tokens}
            })))
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // Anthropic family (Bedrock invoke)
    // =========================================================================

    /// Non-streaming Messages response
    pub async fn mock_anthropic_invoke(&self, tenant: &str, name: &str, text: &str) {
        Self::post(tenant, format!("/{}/{}/invoke", tenant, name))
            .and(body_partial_json(json!({"anthropic_version": "bedrock-2023-05-31"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_01",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4",
                "content": [{"type": "text", "text": text}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 21, "output_tokens": 7}
            })))
            .mount(&self.server)
            .await;
    }

    /// Streaming Messages response
    pub async fn mock_anthropic_stream(&self, tenant: &str, name: &str, deltas: &[&str]) {
        Self::post(tenant, format!("/{}/{}/invoke-with-response-stream", tenant, name))
            .and(body_partial_json(json!({"anthropic_version": "bedrock-2023-05-31"})))
            .respond_with(Self::sse(anthropic_sse(deltas, 21, 7)))
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // Gemini family
    // =========================================================================

    /// Non-streaming generateContent
    pub async fn mock_gemini_generate(&self, tenant: &str, name: &str, model: &str, text: &str) {
        Self::post(
            tenant,
            format!("/{}/{}/models/{}:generateContent", tenant, name, model),
        )
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {"promptTokenCount": 11, "candidatesTokenCount": 3, "totalTokenCount": 14},
            "modelVersion": model
        })))
        .mount(&self.server)
        .await;
    }

    /// streamGenerateContent in SSE mode
    pub async fn mock_gemini_stream(&self, tenant: &str, name: &str, model: &str, deltas: &[&str]) {
        Self::post(
            tenant,
            format!("/{}/{}/models/{}:streamGenerateContent", tenant, name, model),
        )
        .and(query_param("alt", "sse"))
        .respond_with(Self::sse(gemini_sse(deltas)))
        .mount(&self.server)
        .await;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Requests received by one deployment, in arrival order
    pub async fn requests_to(&self, tenant: &str, name: &str) -> Vec<Request> {
        let prefix = format!("/{}/{}/", tenant, name);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path().starts_with(&prefix))
            .collect()
    }

    /// JSON body of the last request received by one deployment
    pub async fn last_body(&self, tenant: &str, name: &str) -> Option<Value> {
        self.requests_to(tenant, name)
            .await
            .last()
            .and_then(|r| serde_json::from_slice(&r.body).ok())
    }
}

/// Non-streaming OpenAI chat completion body
pub fn openai_completion(content: &str, prompt_tokens: u64, completion_tokens: u64) -> Value {
    json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion",
        "created": 1_706_745_600,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    })
}

/// OpenAI stream: role chunk, one chunk per delta, finish, usage, `[DONE]`
pub fn openai_sse(deltas: &[&str], prompt_tokens: u64, completion_tokens: u64) -> String {
    let chunk = |delta: Value, finish: Value| {
        json!({
            "id": "chatcmpl-upstream",
            "object": "chat.completion.chunk",
            "created": 1_706_745_600,
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
        })
    };

    let mut events = vec![chunk(json!({"role": "assistant", "content": ""}), Value::Null)];
    events.extend(deltas.iter().map(|d| chunk(json!({"content": d}), Value::Null)));
    events.push(chunk(json!({}), json!("stop")));
    events.push(json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion.chunk",
        "created": 1_706_745_600,
        "model": "gpt-4o",
        "choices": [],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    }));

    let mut body: String = events.iter().map(|e| format!("data: {}\n\n", e)).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

/// Anthropic Messages stream with one text block
pub fn anthropic_sse(deltas: &[&str], input_tokens: u64, output_tokens: u64) -> String {
    let mut events = vec![
        (
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_01",
                    "type": "message",
                    "role": "assistant",
                    "model": "claude-sonnet-4",
                    "content": [],
                    "usage": {"input_tokens": input_tokens, "output_tokens": 1}
                }
            }),
        ),
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
    ];
    events.extend(deltas.iter().map(|d| {
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": d}}),
        )
    }));
    events.push((
        "content_block_stop",
        json!({"type": "content_block_stop", "index": 0}),
    ));
    events.push((
        "message_delta",
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": output_tokens}}),
    ));
    events.push(("message_stop", json!({"type": "message_stop"})));

    events
        .iter()
        .map(|(name, data)| format!("event: {}\ndata: {}\n\n", name, data))
        .collect()
}

/// Gemini SSE stream; the last chunk carries the finish reason and usage
pub fn gemini_sse(deltas: &[&str]) -> String {
    let last = deltas.len().saturating_sub(1);
    deltas
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let mut chunk = json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": d}]}, "index": 0}]
            });
            if i == last {
                chunk["candidates"][0]["finishReason"] = json!("STOP");
                chunk["usageMetadata"] =
                    json!({"promptTokenCount": 11, "candidatesTokenCount": 3, "totalTokenCount": 14});
            }
            format!("data: {}\n\n", chunk)
        })
        .collect()
}

/// Collect the `data:` payloads of an SSE body, skipping `[DONE]`
pub fn sse_data(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|data| *data != "[DONE]")
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

/// Collect the `event:` names of an SSE body
pub fn sse_event_names(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .map(str::to_string)
        .collect()
}
