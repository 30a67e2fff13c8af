//! Error types for Switchyard
//!
//! Every terminal failure of a request is an [`AppError`]. The response body
//! follows the error shape of the wire format the caller speaks.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::credentials::UpstreamAuthError;
use crate::routing::ModelNotFoundError;
use crate::translate::{TranslationError, WireFormat};
use crate::upstream::Backpressure;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("{0}")]
    ModelNotFound(#[from] ModelNotFoundError),

    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(#[from] UpstreamAuthError),

    #[error("All {attempts} backend candidates failed; last error: {last_error}")]
    FailoverExhausted { attempts: usize, last_error: String },

    #[error("{0}")]
    Backpressure(#[from] Backpressure),

    #[error("Upstream rejected the request with status {status}: {body}")]
    UpstreamValidation { status: u16, body: String },

    #[error("{0}")]
    Translation(#[from] TranslationError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid JSON in request: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Per-format error classification
struct Kind {
    status: StatusCode,
    /// OpenAI `type` and Anthropic `error.type`
    error_type: &'static str,
    /// OpenAI `code`
    code: &'static str,
    /// Gemini `status`
    google_status: &'static str,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.kind().status
    }

    fn kind(&self) -> Kind {
        let (status, error_type, code, google_status) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_api_key",
                "UNAUTHENTICATED",
            ),
            AppError::ModelNotFound(_) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "model_not_found",
                "NOT_FOUND",
            ),
            AppError::UpstreamAuth(_) => (
                StatusCode::BAD_GATEWAY,
                "api_error",
                "upstream_auth_failed",
                "UNAVAILABLE",
            ),
            AppError::FailoverExhausted { .. } => (
                StatusCode::BAD_GATEWAY,
                "api_error",
                "failover_exhausted",
                "UNAVAILABLE",
            ),
            AppError::Backpressure(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "overloaded_error",
                "backpressure",
                "UNAVAILABLE",
            ),
            AppError::UpstreamValidation { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "upstream_rejected",
                "INVALID_ARGUMENT",
            ),
            AppError::Translation(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "unsupported_payload",
                "INVALID_ARGUMENT",
            ),
            AppError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                "INVALID_ARGUMENT",
            ),
            AppError::JsonError(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_json",
                "INVALID_ARGUMENT",
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "api_error",
                "internal_error",
                "INTERNAL",
            ),
        };
        Kind {
            status,
            error_type,
            code,
            google_status,
        }
    }

    /// Message shown to the caller. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Error body in the shape of `format`
    pub fn body(&self, format: WireFormat) -> Value {
        let kind = self.kind();
        let message = self.public_message();
        match format {
            WireFormat::OpenAi => json!({
                "error": {
                    "message": message,
                    "type": kind.error_type,
                    "code": kind.code,
                }
            }),
            WireFormat::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": kind.error_type,
                    "message": message,
                }
            }),
            WireFormat::Gemini => json!({
                "error": {
                    "code": kind.status.as_u16(),
                    "message": message,
                    "status": kind.google_status,
                }
            }),
        }
    }

    /// Respond in the error shape of `format`
    pub fn in_format(self, format: WireFormat) -> WireError {
        WireError {
            error: self,
            format,
        }
    }
}

/// An [`AppError`] bound to the caller's wire format
#[derive(Debug)]
pub struct WireError {
    pub error: AppError,
    pub format: WireFormat,
}

impl IntoResponse for WireError {
    fn into_response(self) -> Response {
        if let AppError::Internal(e) = &self.error {
            tracing::error!(error = ?e, "Internal error");
        }
        (self.error.status(), Json(self.error.body(self.format))).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.in_format(WireFormat::OpenAi).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
