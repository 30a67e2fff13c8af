//! Chat endpoints
//!
//! `/v1/chat/completions` (OpenAI) and `/v1/messages` (Anthropic). Both hand
//! the raw JSON body to the orchestrator together with the caller's format;
//! streaming is decided by the body's `stream` flag.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::{
    error::AppError, proxy, routes::metrics::record_request, translate::WireFormat, AppState,
};

pub const CHAT_COMPLETIONS: &str = "/v1/chat/completions";
pub const MESSAGES: &str = "/v1/messages";

/// Parse a request body, reporting malformed JSON in the caller's format
pub(crate) fn parse_body(body: &Bytes) -> Result<Value, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("request body is empty".to_string()));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Run one chat request and record its outcome
pub(crate) async fn serve_chat(
    state: &AppState,
    format: WireFormat,
    endpoint: &'static str,
    body: Result<Value, AppError>,
) -> Response {
    let start_time = Instant::now();

    let response = match body {
        Ok(body) => proxy::chat(state, format, endpoint, body).await,
        Err(e) => e.in_format(format).into_response(),
    };

    record_request(endpoint, response.status(), start_time.elapsed().as_secs_f64());
    response
}

/// Handle OpenAI chat completion requests
pub async fn chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    serve_chat(&state, WireFormat::OpenAi, CHAT_COMPLETIONS, parse_body(&body)).await
}

/// Handle Anthropic Messages requests
pub async fn messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    serve_chat(&state, WireFormat::Anthropic, MESSAGES, parse_body(&body)).await
}
