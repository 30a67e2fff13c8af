//! Canonical chat representation
//!
//! Every wire format converts to and from these types; no converter talks to
//! another format directly.

use serde_json::{Map, Value};

use super::WireFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    /// Result of a tool call, answering `Message::tool_call_id`
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Url(String),
    Base64 { media_type: String, data: String },
}

impl ImageSource {
    /// Parse `data:<media>;base64,<data>` URLs into inline data.
    pub fn from_url(url: &str) -> Self {
        parse_data_url(url)
            .map(|(media_type, data)| Self::Base64 { media_type, data })
            .unwrap_or_else(|| Self::Url(url.to_string()))
    }

    pub fn to_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Base64 { media_type, data } => format!("data:{};base64,{}", media_type, data),
        }
    }
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    Some((media_type.to_string(), data.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Image(ImageSource),
    /// A part only its own format understands, e.g. a thinking block
    Opaque { format: WireFormat, value: Value },
}

impl Part {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    /// Tool result reported as a failure
    pub is_error: bool,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            is_error: false,
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::Text(text.into())])
    }

    /// Concatenated text parts
    pub fn joined_text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDecl {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema of the arguments
    pub parameters: Value,
    /// Fields of the source declaration with no IR equivalent
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub max_tokens: Option<u64>,
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Format the request was decoded from
    pub source: WireFormat,
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub params: GenerationParams,
    pub tools: Vec<ToolDecl>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
    /// Caller asked for a usage record at the end of a stream
    pub stream_usage: bool,
    /// Top-level fields of the source body with no IR equivalent
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(source: WireFormat, model: impl Into<String>) -> Self {
        Self {
            source,
            model: model.into(),
            system: None,
            messages: Vec::new(),
            params: GenerationParams::default(),
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            stream_usage: false,
            extra: Map::new(),
        }
    }

    /// All text a tokenizer should see for a prompt-size estimate
    pub fn prompt_text(&self) -> String {
        let mut text = self.system.clone().unwrap_or_default();
        for message in &self.messages {
            text.push('\n');
            text.push_str(&message.joined_text());
        }
        text
    }

    /// Extras carried over only when encoding back into the source format
    pub fn extra_for(&self, target: WireFormat) -> Option<&Map<String, Value>> {
        (self.source == target).then_some(&self.extra)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    StopSequence,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub id: Option<String>,
    pub model: Option<String>,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish: Option<FinishReason>,
    pub usage: Option<Usage>,
}
