//! Protocol translation
//!
//! Converts request and response bodies, whole or streamed, between the
//! supported wire formats by way of the canonical representation in [`ir`].
//! [`sanitize`] strips fields backends reject before a body leaves the
//! gateway.

pub mod anthropic;
pub mod gemini;
pub mod ir;
pub mod openai;
pub mod sanitize;
pub mod stream;

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::streaming::{SseEvent, StreamError};

pub use ir::{ChatRequest, ChatResponse, FinishReason, Usage};
pub use sanitize::sanitize;
pub use stream::{relay, RelayPlan, StreamEvent, StreamSummary};

/// JSON shape a provider's public API expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
}

impl WireFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    /// Format of the public endpoint serving `path`
    pub fn for_path(path: &str) -> Self {
        if path.starts_with("/v1/messages") {
            Self::Anthropic
        } else if path.starts_with("/v1beta/") {
            Self::Gemini
        } else {
            Self::OpenAi
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payloads that cannot be mapped between formats
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranslationError {
    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unsupported role '{0}'")]
    UnsupportedRole(String),

    #[error("{kind} content cannot be sent to a {target} backend")]
    UnsupportedContent { kind: String, target: WireFormat },

    #[error("tool call arguments are not valid JSON: {0}")]
    MalformedArguments(String),

    #[error("{operation} is not supported for {family} models")]
    UnsupportedOperation { operation: String, family: String },
}

impl TranslationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Options fixed for the lifetime of one downstream stream
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub request_id: String,
    pub model: String,
    /// Emit a usage record before the terminal marker
    pub include_usage: bool,
}

/// Upstream SSE events -> canonical stream events
pub trait StreamDecoder: Send {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<StreamEvent>, StreamError>;
}

/// Canonical stream events -> downstream SSE frames
pub trait StreamEncoder: Send {
    fn encode(&mut self, event: &StreamEvent) -> Vec<Bytes>;

    /// Re-frame an upstream event that is already in this format.
    fn passthrough(&mut self, event: &SseEvent) -> Vec<Bytes>;

    /// Frames closing the stream; empty once a terminal frame was sent.
    fn finish(&mut self) -> Vec<Bytes>;

    /// The single terminal error frame
    fn error(&mut self, error: &StreamError) -> Bytes;
}

/// Whole-body and streaming conversions of one wire format
pub trait WireCodec: Send + Sync {
    fn format(&self) -> WireFormat;

    fn decode_request(&self, body: &Value) -> Result<ChatRequest, TranslationError>;

    fn encode_request(&self, request: &ChatRequest) -> Result<Value, TranslationError>;

    fn decode_response(&self, body: &Value) -> Result<ChatResponse, TranslationError>;

    fn encode_response(&self, response: &ChatResponse, model: &str) -> Value;

    fn stream_decoder(&self) -> Box<dyn StreamDecoder>;

    fn stream_encoder(&self, options: EncoderOptions) -> Box<dyn StreamEncoder>;
}

pub fn codec_for(format: WireFormat) -> &'static dyn WireCodec {
    match format {
        WireFormat::OpenAi => &openai::OpenAiCodec,
        WireFormat::Anthropic => &anthropic::AnthropicCodec,
        WireFormat::Gemini => &gemini::GeminiCodec,
    }
}

/// Re-encode a request decoded from one format into another.
pub fn translate_request(body: &Value, from: WireFormat, to: WireFormat) -> Result<Value, TranslationError> {
    let request = codec_for(from).decode_request(body)?;
    codec_for(to).encode_request(&request)
}

pub(crate) fn as_object(body: &Value) -> Result<&Map<String, Value>, TranslationError> {
    body.as_object().ok_or(TranslationError::NotAnObject)
}

pub(crate) fn required_str<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a str, TranslationError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(TranslationError::invalid(field, "expected a string")),
        None => Err(TranslationError::MissingField(field.to_string())),
    }
}

pub(crate) fn required_array<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a Vec<Value>, TranslationError> {
    match obj.get(field) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(TranslationError::invalid(field, "expected an array")),
        None => Err(TranslationError::MissingField(field.to_string())),
    }
}

pub(crate) fn opt_str(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn opt_f64(obj: &Map<String, Value>, field: &str) -> Option<f64> {
    obj.get(field).and_then(Value::as_f64)
}

pub(crate) fn opt_u64(obj: &Map<String, Value>, field: &str) -> Option<u64> {
    obj.get(field).and_then(Value::as_u64)
}

/// A string or array of strings
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Copy the keys of `obj` not listed in `known`
pub(crate) fn unknown_fields(obj: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
    obj.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Parse tool-call arguments given as a JSON string
pub(crate) fn parse_arguments(raw: &str) -> Result<Value, TranslationError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| TranslationError::MalformedArguments(e.to_string()))
}

/// Stable identifier for responses that arrive without one
pub(crate) fn generated_id(prefix: &str) -> String {
    format!("{}{}", prefix, uuid::Uuid::new_v4().simple())
}
