//! Embeddings endpoint
//!
//! OpenAI-compatible `/v1/embeddings`, served by OpenAI-family deployments.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
};

use crate::{
    proxy, routes::metrics::record_request, translate::WireFormat, AppState,
};

use super::chat::parse_body;

pub const EMBEDDINGS: &str = "/v1/embeddings";

/// Handle embeddings requests
pub async fn embeddings(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let start_time = Instant::now();

    let response = match parse_body(&body) {
        Ok(body) => proxy::embeddings(&state, EMBEDDINGS, body).await,
        Err(e) => e.in_format(WireFormat::OpenAi).into_response(),
    };

    record_request(EMBEDDINGS, response.status(), start_time.elapsed().as_secs_f64());
    response
}
