//! Anthropic Messages format

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::streaming::{format_event, SseEvent, StreamError};

use super::ir::{
    ChatRequest, ChatResponse, FinishReason, ImageSource, Message, Part, Role, ToolCall,
    ToolChoice, ToolDecl, Usage,
};
use super::openai::opaque_kind;
use super::{
    as_object, generated_id, opt_f64, opt_str, opt_u64, required_array, required_str,
    string_list, unknown_fields, EncoderOptions, StreamDecoder, StreamEncoder, StreamEvent,
    TranslationError, WireCodec, WireFormat,
};

/// Messages API requires `max_tokens`; used when the caller's format does not.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

const KNOWN_FIELDS: &[&str] = &[
    "model",
    "messages",
    "system",
    "max_tokens",
    "temperature",
    "top_p",
    "top_k",
    "stop_sequences",
    "stream",
    "tools",
    "tool_choice",
];

pub struct AnthropicCodec;

fn finish_reason_to_str(reason: &FinishReason) -> &str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::StopSequence => "stop_sequence",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::ContentFilter => "refusal",
        FinishReason::Other(other) => other.as_str(),
    }
}

fn finish_reason_from_str(reason: &str) -> FinishReason {
    match reason {
        "end_turn" => FinishReason::Stop,
        "stop_sequence" => FinishReason::StopSequence,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

fn decode_system(system: Option<&Value>) -> Result<Option<String>, TranslationError> {
    match system {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(Value::Array(blocks)) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            Ok(Some(texts.join("\n")))
        }
        Some(_) => Err(TranslationError::invalid(
            "system",
            "expected a string or an array of text blocks",
        )),
    }
}

fn decode_image(block: &Value) -> Result<Part, TranslationError> {
    let source = block
        .get("source")
        .ok_or_else(|| TranslationError::MissingField("image.source".to_string()))?;
    match source.get("type").and_then(Value::as_str) {
        Some("base64") => Ok(Part::Image(ImageSource::Base64 {
            media_type: opt_str(source, "media_type").unwrap_or_else(|| "image/png".to_string()),
            data: opt_str(source, "data")
                .ok_or_else(|| TranslationError::MissingField("image.source.data".to_string()))?,
        })),
        Some("url") => Ok(Part::Image(ImageSource::Url(
            opt_str(source, "url")
                .ok_or_else(|| TranslationError::MissingField("image.source.url".to_string()))?,
        ))),
        _ => Ok(Part::Opaque {
            format: WireFormat::Anthropic,
            value: block.clone(),
        }),
    }
}

fn decode_tool_result(block: &Value) -> Result<Message, TranslationError> {
    let id = opt_str(block, "tool_use_id")
        .ok_or_else(|| TranslationError::MissingField("tool_result.tool_use_id".to_string()))?;
    let parts = match block.get("content") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => vec![Part::Text(text.clone())],
        Some(Value::Array(blocks)) => blocks
            .iter()
            .map(|b| match b.get("type").and_then(Value::as_str) {
                Some("text") => Ok(Part::Text(opt_str(b, "text").unwrap_or_default())),
                Some("image") => decode_image(b),
                _ => Ok(Part::Opaque {
                    format: WireFormat::Anthropic,
                    value: b.clone(),
                }),
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(TranslationError::invalid("tool_result.content", "unexpected type")),
    };
    Ok(Message {
        tool_call_id: Some(id),
        is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        ..Message::new(Role::Tool, parts)
    })
}

/// One Anthropic message becomes one IR message, preceded by one `Tool`
/// message per `tool_result` block it carries.
fn decode_message(raw: &Value, out: &mut Vec<Message>) -> Result<(), TranslationError> {
    let role = match raw.get("role").and_then(Value::as_str) {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        Some(other) => return Err(TranslationError::UnsupportedRole(other.to_string())),
        None => return Err(TranslationError::MissingField("messages[].role".to_string())),
    };

    let blocks = match raw.get("content") {
        Some(Value::String(text)) => {
            out.push(Message::text(role, text.clone()));
            return Ok(());
        }
        Some(Value::Array(blocks)) => blocks,
        _ => return Err(TranslationError::MissingField("messages[].content".to_string())),
    };

    let mut message = Message::new(role, Vec::new());
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => message
                .parts
                .push(Part::Text(opt_str(block, "text").unwrap_or_default())),
            Some("image") => message.parts.push(decode_image(block)?),
            Some("tool_use") => message.tool_calls.push(ToolCall {
                id: opt_str(block, "id").unwrap_or_else(|| generated_id("toolu_")),
                name: opt_str(block, "name")
                    .ok_or_else(|| TranslationError::MissingField("tool_use.name".to_string()))?,
                arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
            }),
            Some("tool_result") => out.push(decode_tool_result(block)?),
            Some(_) => message.parts.push(Part::Opaque {
                format: WireFormat::Anthropic,
                value: block.clone(),
            }),
            None => return Err(TranslationError::MissingField("content[].type".to_string())),
        }
    }

    if !message.parts.is_empty() || !message.tool_calls.is_empty() {
        out.push(message);
    }
    Ok(())
}

fn decode_tools(tools: Option<&Value>) -> Result<Vec<ToolDecl>, TranslationError> {
    let Some(Value::Array(tools)) = tools else {
        return Ok(Vec::new());
    };
    tools
        .iter()
        .map(|tool| {
            let obj = as_object(tool)?;
            Ok(ToolDecl {
                name: required_str(obj, "name")?.to_string(),
                description: opt_str(tool, "description"),
                parameters: obj
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                extra: unknown_fields(obj, &["name", "description", "input_schema"]),
            })
        })
        .collect()
}

fn decode_tool_choice(choice: Option<&Value>) -> Option<ToolChoice> {
    let choice = choice?;
    match choice.get("type").and_then(Value::as_str)? {
        "auto" => Some(ToolChoice::Auto),
        "any" => Some(ToolChoice::Required),
        "none" => Some(ToolChoice::None),
        "tool" => opt_str(choice, "name").map(ToolChoice::Tool),
        _ => None,
    }
}

fn encode_part(part: &Part) -> Result<Value, TranslationError> {
    match part {
        Part::Text(text) => Ok(json!({"type": "text", "text": text})),
        Part::Image(ImageSource::Base64 { media_type, data }) => Ok(json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data}
        })),
        Part::Image(ImageSource::Url(url)) => Ok(json!({
            "type": "image",
            "source": {"type": "url", "url": url}
        })),
        Part::Opaque { format: WireFormat::Anthropic, value } => Ok(value.clone()),
        Part::Opaque { value, .. } => Err(TranslationError::UnsupportedContent {
            kind: opaque_kind(value),
            target: WireFormat::Anthropic,
        }),
    }
}

fn encode_blocks(message: &Message) -> Result<(&'static str, Vec<Value>), TranslationError> {
    match message.role {
        Role::Tool => {
            let content = if message.parts.iter().all(|p| matches!(p, Part::Text(_))) {
                Value::String(message.joined_text())
            } else {
                Value::Array(message.parts.iter().map(encode_part).collect::<Result<_, _>>()?)
            };
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": content,
            });
            if message.is_error {
                block["is_error"] = json!(true);
            }
            Ok(("user", vec![block]))
        }
        Role::User | Role::Assistant => {
            let mut blocks: Vec<Value> =
                message.parts.iter().map(encode_part).collect::<Result<_, _>>()?;
            for call in &message.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments,
                }));
            }
            let role = if message.role == Role::User { "user" } else { "assistant" };
            Ok((role, blocks))
        }
    }
}

fn encode_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
    }
}

fn decode_usage(usage: Option<&Value>) -> Option<Usage> {
    let usage = usage?.as_object()?;
    Some(Usage {
        prompt_tokens: opt_u64(usage, "input_tokens").unwrap_or(0),
        completion_tokens: opt_u64(usage, "output_tokens").unwrap_or(0),
    })
}

impl WireCodec for AnthropicCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Anthropic
    }

    fn decode_request(&self, body: &Value) -> Result<ChatRequest, TranslationError> {
        let obj = as_object(body)?;
        let mut request = ChatRequest::new(WireFormat::Anthropic, required_str(obj, "model")?);

        request.system = decode_system(obj.get("system"))?;
        for raw in required_array(obj, "messages")? {
            decode_message(raw, &mut request.messages)?;
        }

        request.params.max_tokens = opt_u64(obj, "max_tokens");
        request.params.temperature = opt_f64(obj, "temperature");
        request.params.top_p = opt_f64(obj, "top_p");
        request.params.top_k = opt_u64(obj, "top_k");
        request.params.stop = string_list(obj.get("stop_sequences"));
        request.tools = decode_tools(obj.get("tools"))?;
        request.tool_choice = decode_tool_choice(obj.get("tool_choice"));
        request.stream = obj.get("stream").and_then(Value::as_bool).unwrap_or(false);
        // Messages streams always carry usage.
        request.stream_usage = true;
        request.extra = unknown_fields(obj, KNOWN_FIELDS);

        Ok(request)
    }

    fn encode_request(&self, request: &ChatRequest) -> Result<Value, TranslationError> {
        let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let (role, blocks) = encode_blocks(message)?;
            if blocks.is_empty() {
                continue;
            }
            // Consecutive same-role turns merge; tool results must share one user turn.
            match messages.last_mut() {
                Some(last) if last["role"] == role => {
                    if let Some(content) = last["content"].as_array_mut() {
                        content.extend(blocks);
                    }
                }
                _ => messages.push(json!({"role": role, "content": blocks})),
            }
        }

        let mut out = Map::new();
        if let Some(extra) = request.extra_for(WireFormat::Anthropic) {
            out.extend(extra.clone());
        }
        out.insert("model".into(), json!(request.model));
        if let Some(system) = &request.system {
            out.insert("system".into(), json!(system));
        }
        out.insert("messages".into(), Value::Array(messages));
        out.insert(
            "max_tokens".into(),
            json!(request.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if let Some(t) = request.params.temperature {
            out.insert("temperature".into(), json!(t));
        }
        if let Some(p) = request.params.top_p {
            out.insert("top_p".into(), json!(p));
        }
        if let Some(k) = request.params.top_k {
            out.insert("top_k".into(), json!(k));
        }
        if !request.params.stop.is_empty() {
            out.insert("stop_sequences".into(), json!(request.params.stop));
        }
        if !request.tools.is_empty() {
            let keep_extra = request.source == WireFormat::Anthropic;
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    let mut decl = Map::new();
                    if keep_extra {
                        decl.extend(tool.extra.clone());
                    }
                    decl.insert("name".into(), json!(tool.name));
                    if let Some(description) = &tool.description {
                        decl.insert("description".into(), json!(description));
                    }
                    decl.insert("input_schema".into(), tool.parameters.clone());
                    Value::Object(decl)
                })
                .collect();
            out.insert("tools".into(), Value::Array(tools));
        }
        if let Some(choice) = &request.tool_choice {
            out.insert("tool_choice".into(), encode_tool_choice(choice));
        }
        if request.stream {
            out.insert("stream".into(), json!(true));
        }
        Ok(Value::Object(out))
    }

    fn decode_response(&self, body: &Value) -> Result<ChatResponse, TranslationError> {
        let obj = as_object(body)?;
        let mut response = ChatResponse {
            id: opt_str(body, "id"),
            model: opt_str(body, "model"),
            content: String::new(),
            tool_calls: Vec::new(),
            finish: obj
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(finish_reason_from_str),
            usage: decode_usage(obj.get("usage")),
        };

        for block in required_array(obj, "content")? {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        response.content.push_str(text);
                    }
                }
                Some("tool_use") => response.tool_calls.push(ToolCall {
                    id: opt_str(block, "id").unwrap_or_else(|| generated_id("toolu_")),
                    name: opt_str(block, "name").unwrap_or_default(),
                    arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                }),
                _ => {}
            }
        }
        Ok(response)
    }

    fn encode_response(&self, response: &ChatResponse, model: &str) -> Value {
        let mut content = Vec::new();
        if !response.content.is_empty() {
            content.push(json!({"type": "text", "text": response.content}));
        }
        for call in &response.tool_calls {
            content.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments,
            }));
        }
        let usage = response.usage.unwrap_or_default();
        let stop_reason = response
            .finish
            .as_ref()
            .map(|f| finish_reason_to_str(f).to_string())
            .unwrap_or_else(|| "end_turn".to_string());

        json!({
            "id": response.id.clone().unwrap_or_else(|| generated_id("msg_")),
            "type": "message",
            "role": "assistant",
            "model": response.model.as_deref().unwrap_or(model),
            "content": content,
            "stop_reason": stop_reason,
            "stop_sequence": null,
            "usage": {
                "input_tokens": usage.prompt_tokens,
                "output_tokens": usage.completion_tokens,
            },
        })
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(AnthropicStreamDecoder::default())
    }

    fn stream_encoder(&self, options: EncoderOptions) -> Box<dyn StreamEncoder> {
        Box::new(AnthropicStreamEncoder::new(options))
    }
}

/// Messages stream events -> canonical events
///
/// Tool calls are numbered in order of appearance; content blocks of other
/// kinds do not consume a tool index.
#[derive(Default)]
pub struct AnthropicStreamDecoder {
    tool_index_by_block: HashMap<u64, usize>,
}

impl StreamDecoder for AnthropicStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<StreamEvent>, StreamError> {
        let data: Value = serde_json::from_str(&event.data)
            .map_err(|e| StreamError::Parse(format!("{}: {}", e, event.data)))?;
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .or(event.event.as_deref())
            .unwrap_or_default();

        let events = match kind {
            "message_start" => {
                let message = data.get("message");
                let mut events = vec![StreamEvent::Start {
                    id: message.and_then(|m| opt_str(m, "id")),
                    model: message.and_then(|m| opt_str(m, "model")),
                }];
                if let Some(usage) = message.and_then(|m| m.get("usage")) {
                    events.push(StreamEvent::Usage {
                        prompt: usage.get("input_tokens").and_then(Value::as_u64),
                        completion: usage.get("output_tokens").and_then(Value::as_u64),
                    });
                }
                events
            }
            "content_block_start" => {
                let block = data.get("content_block");
                match block.and_then(|b| b.get("type")).and_then(Value::as_str) {
                    Some("tool_use") => {
                        let block_index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
                        let index = self.tool_index_by_block.len();
                        self.tool_index_by_block.insert(block_index, index);
                        vec![StreamEvent::ToolCallStart {
                            index,
                            id: block
                                .and_then(|b| opt_str(b, "id"))
                                .unwrap_or_else(|| generated_id("toolu_")),
                            name: block.and_then(|b| opt_str(b, "name")).unwrap_or_default(),
                        }]
                    }
                    Some("text") => block
                        .and_then(|b| b.get("text"))
                        .and_then(Value::as_str)
                        .filter(|t| !t.is_empty())
                        .map(|t| vec![StreamEvent::Text(t.to_string())])
                        .unwrap_or_default(),
                    _ => Vec::new(),
                }
            }
            "content_block_delta" => {
                let delta = data.get("delta");
                match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                    Some("text_delta") => delta
                        .and_then(|d| opt_str(d, "text"))
                        .map(|t| vec![StreamEvent::Text(t)])
                        .unwrap_or_default(),
                    Some("input_json_delta") => {
                        let block_index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
                        match self.tool_index_by_block.get(&block_index) {
                            Some(index) => vec![StreamEvent::ToolCallArgs {
                                index: *index,
                                fragment: delta
                                    .and_then(|d| opt_str(d, "partial_json"))
                                    .unwrap_or_default(),
                            }],
                            None => Vec::new(),
                        }
                    }
                    _ => Vec::new(),
                }
            }
            "message_delta" => {
                let mut events = Vec::new();
                if let Some(reason) = data
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    events.push(StreamEvent::Finish(finish_reason_from_str(reason)));
                }
                if let Some(usage) = data.get("usage") {
                    events.push(StreamEvent::Usage {
                        prompt: usage.get("input_tokens").and_then(Value::as_u64),
                        completion: usage.get("output_tokens").and_then(Value::as_u64),
                    });
                }
                events
            }
            "message_stop" => vec![StreamEvent::Done],
            "error" => {
                let message = data
                    .get("error")
                    .and_then(|e| opt_str(e, "message"))
                    .unwrap_or_else(|| data.to_string());
                vec![StreamEvent::Error(message)]
            }
            // ping, content_block_stop and unknown future events
            _ => Vec::new(),
        };
        Ok(events)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    Text,
    Tool,
}

/// Canonical events -> Messages stream events
pub struct AnthropicStreamEncoder {
    id: String,
    model: String,
    started: bool,
    open: Option<(usize, BlockKind)>,
    next_block: usize,
    block_by_tool: HashMap<usize, usize>,
    stop_reason: Option<FinishReason>,
    usage: Usage,
    terminated: bool,
}

impl AnthropicStreamEncoder {
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            id: format!("msg_{}", options.request_id.replace('-', "")),
            model: options.model,
            started: false,
            open: None,
            next_block: 0,
            block_by_tool: HashMap::new(),
            stop_reason: None,
            usage: Usage::default(),
            terminated: false,
        }
    }

    fn event(name: &str, payload: Value) -> Bytes {
        format_event(name, &payload.to_string())
    }

    fn ensure_started(&mut self, frames: &mut Vec<Bytes>) {
        if self.started {
            return;
        }
        self.started = true;
        frames.push(Self::event(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": self.usage.prompt_tokens, "output_tokens": 0},
                }
            }),
        ));
    }

    fn close_block(&mut self, frames: &mut Vec<Bytes>) {
        if let Some((index, _)) = self.open.take() {
            frames.push(Self::event(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": index}),
            ));
        }
    }

    fn open_block(&mut self, kind: BlockKind, content_block: Value, frames: &mut Vec<Bytes>) -> usize {
        self.close_block(frames);
        let index = self.next_block;
        self.next_block += 1;
        self.open = Some((index, kind));
        frames.push(Self::event(
            "content_block_start",
            json!({"type": "content_block_start", "index": index, "content_block": content_block}),
        ));
        index
    }
}

impl StreamEncoder for AnthropicStreamEncoder {
    fn encode(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        let mut frames = Vec::new();
        match event {
            StreamEvent::Start { id, model } => {
                if let Some(id) = id.as_ref().filter(|id| id.starts_with("msg_")) {
                    self.id = id.clone();
                }
                if let Some(model) = model {
                    self.model = model.clone();
                }
            }
            StreamEvent::Text(text) => {
                self.ensure_started(&mut frames);
                let index = match self.open {
                    Some((index, BlockKind::Text)) => index,
                    _ => self.open_block(BlockKind::Text, json!({"type": "text", "text": ""}), &mut frames),
                };
                frames.push(Self::event(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "text_delta", "text": text}
                    }),
                ));
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                self.ensure_started(&mut frames);
                let block = self.open_block(
                    BlockKind::Tool,
                    json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
                    &mut frames,
                );
                self.block_by_tool.insert(*index, block);
            }
            StreamEvent::ToolCallArgs { index, fragment } => {
                if let Some(block) = self.block_by_tool.get(index).copied() {
                    frames.push(Self::event(
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": block,
                            "delta": {"type": "input_json_delta", "partial_json": fragment}
                        }),
                    ));
                }
            }
            StreamEvent::Finish(reason) => self.stop_reason = Some(reason.clone()),
            StreamEvent::Usage { prompt, completion } => {
                if let Some(p) = prompt {
                    self.usage.prompt_tokens = *p;
                }
                if let Some(c) = completion {
                    self.usage.completion_tokens = *c;
                }
            }
            StreamEvent::Error(_) | StreamEvent::Done => {}
        }
        frames
    }

    fn passthrough(&mut self, event: &SseEvent) -> Vec<Bytes> {
        let kind = event.event.clone().or_else(|| {
            serde_json::from_str::<Value>(&event.data)
                .ok()
                .and_then(|v| opt_str(&v, "type"))
        });
        let Some(kind) = kind else {
            return Vec::new();
        };
        if kind == "message_stop" {
            self.terminated = true;
        }
        vec![format_event(&kind, &event.data)]
    }

    fn finish(&mut self) -> Vec<Bytes> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;

        let mut frames = Vec::new();
        self.ensure_started(&mut frames);
        self.close_block(&mut frames);
        let stop_reason = self
            .stop_reason
            .as_ref()
            .map(finish_reason_to_str)
            .unwrap_or("end_turn")
            .to_string();
        frames.push(Self::event(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {
                    "input_tokens": self.usage.prompt_tokens,
                    "output_tokens": self.usage.completion_tokens,
                }
            }),
        ));
        frames.push(Self::event("message_stop", json!({"type": "message_stop"})));
        frames
    }

    fn error(&mut self, error: &StreamError) -> Bytes {
        self.terminated = true;
        Self::event(
            "error",
            json!({
                "type": "error",
                "error": {"type": "api_error", "message": error.to_string()}
            }),
        )
    }
}
