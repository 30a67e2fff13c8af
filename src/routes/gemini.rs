//! Google `generateContent` endpoints
//!
//! The model and the streaming choice travel in the path
//! (`/v1beta/models/{model}:{action}`); they are moved into the body so the
//! rest of the pipeline sees the same shape as the other formats.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Response,
};
use serde_json::Value;

use crate::{error::AppError, translate::WireFormat, AppState};

use super::chat::{parse_body, serve_chat};

pub const GENERATE_CONTENT: &str = "/v1beta/models/generateContent";
pub const STREAM_GENERATE_CONTENT: &str = "/v1beta/models/streamGenerateContent";

/// Split `gemini-2.5-pro:streamGenerateContent` into model and streaming flag
pub fn parse_model_action(model_action: &str) -> Result<(&str, bool), AppError> {
    let (model, action) = model_action.rsplit_once(':').ok_or_else(|| {
        AppError::BadRequest(format!(
            "expected '{{model}}:generateContent', got '{}'",
            model_action
        ))
    })?;

    if model.is_empty() {
        return Err(AppError::BadRequest("model name is empty".to_string()));
    }

    match action {
        "generateContent" => Ok((model, false)),
        "streamGenerateContent" => Ok((model, true)),
        other => Err(AppError::BadRequest(format!(
            "unsupported action '{}'",
            other
        ))),
    }
}

fn with_path_fields(body: Bytes, model: &str, stream: bool) -> Result<Value, AppError> {
    let mut value = parse_body(&body)?;
    let obj = value
        .as_object_mut()
        .ok_or(crate::translate::TranslationError::NotAnObject)?;
    obj.insert("model".to_string(), Value::String(model.to_string()));
    obj.insert("stream".to_string(), Value::Bool(stream));
    Ok(value)
}

/// Handle `POST /v1beta/models/{model}:generateContent` and
/// `:streamGenerateContent`
pub async fn generate_content(
    State(state): State<Arc<AppState>>,
    Path(model_action): Path<String>,
    body: Bytes,
) -> Response {
    let parsed = parse_model_action(&model_action);
    let endpoint = match parsed {
        Ok((_, true)) => STREAM_GENERATE_CONTENT,
        _ => GENERATE_CONTENT,
    };
    let body = parsed.and_then(|(model, stream)| with_path_fields(body, model, stream));

    serve_chat(&state, WireFormat::Gemini, endpoint, body).await
}
