//! Authentication middleware
//!
//! Callers present one of the configured gateway tokens, either as a bearer
//! token or in an `x-api-key` header. Rejections use the error shape of the
//! endpoint being called.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::{error::AppError, translate::WireFormat, AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Extract the Authorization header and return the bearer token
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Caller token from `Authorization: Bearer` or `x-api-key`
pub fn caller_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token);

    bearer.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    })
}

/// Short digest of a caller token, safe to log
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..4])
}

/// Authentication middleware
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let format = WireFormat::for_path(request.uri().path());

    let Some(token) = caller_token(request.headers()) else {
        warn!("Request without caller credentials");
        return AppError::Unauthorized.in_format(format).into_response();
    };

    if !state.registry.is_authorized_caller(token) {
        warn!(caller = %token_fingerprint(token), "Unknown caller token");
        return AppError::Unauthorized.in_format(format).into_response();
    }

    debug!(caller = %token_fingerprint(token), "Caller authenticated");
    next.run(request).await
}
