//! Upstream platform access
//!
//! Pooled HTTP transport, per-family backend adapters and the
//! per-(tenant, model) client cache.

pub mod backend;
pub mod client;
pub mod headers;
pub mod pool;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::translate::WireFormat;

pub use backend::{adapter_for, BackendAdapter};
pub use client::{BackendClient, ClientCache};
pub use pool::{Backpressure, ConnectionPool, LeasedStream, PoolSettings, PoolSlot};

/// Vendor family of a deployed model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendFamily {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
}

impl BackendFamily {
    pub const ALL: [BackendFamily; 3] = [Self::OpenAi, Self::Anthropic, Self::Gemini];

    /// Family of a model, derived from its name
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("claude") || model.contains("anthropic") {
            Self::Anthropic
        } else if model.contains("gemini") {
            Self::Gemini
        } else {
            Self::OpenAi
        }
    }

    /// Wire format the family's deployments speak
    pub fn wire_format(self) -> WireFormat {
        match self {
            Self::OpenAi => WireFormat::OpenAi,
            Self::Anthropic => WireFormat::Anthropic,
            Self::Gemini => WireFormat::Gemini,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

/// How an upstream failure affects the attempt loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Try the next candidate
    Transport,
    /// The tenant's token was refused; drop it and try the next candidate
    CredentialRejected,
    /// The payload was refused; surface to the caller
    Validation,
}

/// Failure of one upstream call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl DispatchError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connect"
        } else if err.is_body() || err.is_decode() {
            "body"
        } else {
            "request"
        };
        Self::Transport(format!("{}: {}", kind, err))
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport(_) => FailureClass::Transport,
            Self::Status { status, .. } => match *status {
                401 | 403 => FailureClass::CredentialRejected,
                404 | 408 | 429 => FailureClass::Transport,
                s if s >= 500 => FailureClass::Transport,
                _ => FailureClass::Validation,
            },
        }
    }
}
