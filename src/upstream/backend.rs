//! Backend family adapters
//!
//! Everything vendor specific about calling a deployment lives here: endpoint
//! paths, API versions and body fields the vendor insists on or rejects.

use std::sync::Arc;

use serde_json::{json, Value};

use super::BackendFamily;

/// API version of OpenAI chat deployments
pub const OPENAI_CHAT_API_VERSION: &str = "2024-12-01-preview";
/// API version of OpenAI embedding deployments
pub const OPENAI_EMBEDDINGS_API_VERSION: &str = "2023-05-15";
/// Messages API version of Bedrock-hosted Anthropic deployments
pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

pub trait BackendAdapter: Send + Sync {
    fn family(&self) -> BackendFamily;

    /// Chat endpoint of a deployment
    fn chat_url(&self, deployment: &str, model: &str, stream: bool) -> String;

    /// Embeddings endpoint, if the family serves embeddings
    fn embeddings_url(&self, _deployment: &str) -> Option<String> {
        None
    }

    /// Apply vendor quirks to a body already in the family's wire format.
    fn finalize_body(&self, body: &mut Value, model: &str, stream: bool);
}

/// Adapter for a family. Adapters are stateless and shared.
pub fn adapter_for(family: BackendFamily) -> Arc<dyn BackendAdapter> {
    match family {
        BackendFamily::OpenAi => Arc::new(OpenAiAdapter),
        BackendFamily::Anthropic => Arc::new(BedrockAnthropicAdapter),
        BackendFamily::Gemini => Arc::new(GeminiAdapter),
    }
}

/// Azure-style OpenAI deployments
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    /// Reasoning models only accept `max_completion_tokens`.
    fn is_reasoning_model(model: &str) -> bool {
        let model = model.to_ascii_lowercase();
        ["o1", "o3", "o4", "gpt-5"]
            .iter()
            .any(|prefix| model.starts_with(prefix))
    }
}

impl BackendAdapter for OpenAiAdapter {
    fn family(&self) -> BackendFamily {
        BackendFamily::OpenAi
    }

    fn chat_url(&self, deployment: &str, _model: &str, _stream: bool) -> String {
        format!(
            "{}/chat/completions?api-version={}",
            deployment, OPENAI_CHAT_API_VERSION
        )
    }

    fn embeddings_url(&self, deployment: &str) -> Option<String> {
        Some(format!(
            "{}/embeddings?api-version={}",
            deployment, OPENAI_EMBEDDINGS_API_VERSION
        ))
    }

    fn finalize_body(&self, body: &mut Value, model: &str, stream: bool) {
        let Some(obj) = body.as_object_mut() else {
            return;
        };
        obj.insert("model".to_string(), Value::String(model.to_string()));

        if stream {
            obj.insert("stream".to_string(), Value::Bool(true));
            obj.insert("stream_options".to_string(), json!({"include_usage": true}));
        } else {
            obj.remove("stream");
            obj.remove("stream_options");
        }

        if Self::is_reasoning_model(model) {
            if let Some(max) = obj.remove("max_tokens") {
                obj.entry("max_completion_tokens").or_insert(max);
            }
        }
    }
}

/// Anthropic Messages served through Bedrock
pub struct BedrockAnthropicAdapter;

impl BackendAdapter for BedrockAnthropicAdapter {
    fn family(&self) -> BackendFamily {
        BackendFamily::Anthropic
    }

    fn chat_url(&self, deployment: &str, _model: &str, stream: bool) -> String {
        if stream {
            format!("{}/invoke-with-response-stream", deployment)
        } else {
            format!("{}/invoke", deployment)
        }
    }

    fn finalize_body(&self, body: &mut Value, _model: &str, _stream: bool) {
        let Some(obj) = body.as_object_mut() else {
            return;
        };
        // Model and streaming are selected by the URL.
        obj.remove("model");
        obj.remove("stream");
        obj.entry("anthropic_version")
            .or_insert_with(|| Value::String(BEDROCK_ANTHROPIC_VERSION.to_string()));
    }
}

/// Gemini generateContent deployments
pub struct GeminiAdapter;

impl BackendAdapter for GeminiAdapter {
    fn family(&self) -> BackendFamily {
        BackendFamily::Gemini
    }

    fn chat_url(&self, deployment: &str, model: &str, stream: bool) -> String {
        if stream {
            format!("{}/models/{}:streamGenerateContent?alt=sse", deployment, model)
        } else {
            format!("{}/models/{}:generateContent", deployment, model)
        }
    }

    fn finalize_body(&self, body: &mut Value, _model: &str, _stream: bool) {
        if let Some(obj) = body.as_object_mut() {
            obj.remove("model");
            obj.remove("stream");
        }
    }
}
