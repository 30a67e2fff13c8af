//! OpenAI chat-completions format

use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::streaming::{format_data, format_done, SseEvent, StreamError};

use super::ir::{
    ChatRequest, ChatResponse, FinishReason, ImageSource, Message, Part, Role, ToolCall,
    ToolChoice, ToolDecl, Usage,
};
use super::{
    as_object, generated_id, opt_f64, opt_str, opt_u64, parse_arguments, required_array,
    required_str, string_list, unknown_fields, EncoderOptions, StreamDecoder, StreamEncoder,
    StreamEvent, TranslationError, WireCodec, WireFormat,
};

const KNOWN_FIELDS: &[&str] = &[
    "model",
    "messages",
    "temperature",
    "top_p",
    "max_tokens",
    "max_completion_tokens",
    "stop",
    "stream",
    "stream_options",
    "tools",
    "tool_choice",
];

pub struct OpenAiCodec;

pub fn finish_reason_to_str(reason: &FinishReason) -> &str {
    match reason {
        FinishReason::Stop | FinishReason::StopSequence => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::Other(other) => other.as_str(),
    }
}

pub fn finish_reason_from_str(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

fn decode_parts(content: Option<&Value>) -> Result<Vec<Part>, TranslationError> {
    match content {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(text)) => Ok(vec![Part::Text(text.clone())]),
        Some(Value::Array(items)) => items.iter().map(decode_part).collect(),
        Some(_) => Err(TranslationError::invalid(
            "content",
            "expected a string or an array of parts",
        )),
    }
}

fn decode_part(part: &Value) -> Result<Part, TranslationError> {
    match part.get("type").and_then(Value::as_str) {
        Some("text") => Ok(Part::Text(opt_str(part, "text").unwrap_or_default())),
        Some("image_url") => {
            let url = part
                .get("image_url")
                .and_then(|i| i.get("url").or(Some(i)))
                .and_then(Value::as_str)
                .ok_or_else(|| TranslationError::MissingField("image_url.url".to_string()))?;
            Ok(Part::Image(ImageSource::from_url(url)))
        }
        Some(_) => Ok(Part::Opaque {
            format: WireFormat::OpenAi,
            value: part.clone(),
        }),
        None => Err(TranslationError::MissingField("content[].type".to_string())),
    }
}

fn decode_tool_calls(calls: Option<&Value>) -> Result<Vec<ToolCall>, TranslationError> {
    let Some(Value::Array(calls)) = calls else {
        return Ok(Vec::new());
    };
    calls
        .iter()
        .map(|call| {
            let function = call
                .get("function")
                .ok_or_else(|| TranslationError::MissingField("tool_calls[].function".to_string()))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => parse_arguments(raw)?,
                Some(Value::Object(obj)) => Value::Object(obj.clone()),
                _ => Value::Object(Map::new()),
            };
            Ok(ToolCall {
                id: opt_str(call, "id").unwrap_or_else(|| generated_id("call_")),
                name: opt_str(function, "name").ok_or_else(|| {
                    TranslationError::MissingField("tool_calls[].function.name".to_string())
                })?,
                arguments,
            })
        })
        .collect()
}

fn decode_message(
    raw: &Value,
    leading: bool,
    system: &mut Vec<String>,
) -> Result<Option<Message>, TranslationError> {
    let role = raw
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| TranslationError::MissingField("messages[].role".to_string()))?;
    let parts = decode_parts(raw.get("content"))?;

    let message = match role {
        // Only the leading instructions become the system prompt; later ones
        // stay in place as user turns so message order survives.
        "system" | "developer" if leading => {
            let text: String = parts.iter().filter_map(Part::as_text).collect();
            system.push(text);
            return Ok(None);
        }
        "system" | "developer" => Message::new(Role::User, parts),
        "user" => Message {
            name: opt_str(raw, "name"),
            ..Message::new(Role::User, parts)
        },
        "assistant" => Message {
            tool_calls: decode_tool_calls(raw.get("tool_calls"))?,
            name: opt_str(raw, "name"),
            ..Message::new(Role::Assistant, parts)
        },
        "tool" => Message {
            tool_call_id: Some(opt_str(raw, "tool_call_id").ok_or_else(|| {
                TranslationError::MissingField("messages[].tool_call_id".to_string())
            })?),
            ..Message::new(Role::Tool, parts)
        },
        "function" => Message {
            tool_call_id: opt_str(raw, "name"),
            name: opt_str(raw, "name"),
            ..Message::new(Role::Tool, parts)
        },
        other => return Err(TranslationError::UnsupportedRole(other.to_string())),
    };
    Ok(Some(message))
}

fn decode_tools(tools: Option<&Value>) -> Result<Vec<ToolDecl>, TranslationError> {
    let Some(Value::Array(tools)) = tools else {
        return Ok(Vec::new());
    };
    tools
        .iter()
        .map(|tool| {
            let function = tool
                .get("function")
                .and_then(Value::as_object)
                .ok_or_else(|| TranslationError::MissingField("tools[].function".to_string()))?;
            Ok(ToolDecl {
                name: required_str(function, "name")?.to_string(),
                description: function
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                parameters: function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                extra: unknown_fields(function, &["name", "description", "parameters"]),
            })
        })
        .collect()
}

fn decode_tool_choice(choice: Option<&Value>) -> Option<ToolChoice> {
    match choice? {
        Value::String(s) => match s.as_str() {
            "none" => Some(ToolChoice::None),
            "required" => Some(ToolChoice::Required),
            _ => Some(ToolChoice::Auto),
        },
        Value::Object(obj) => obj
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .map(|name| ToolChoice::Tool(name.to_string())),
        _ => None,
    }
}

fn encode_parts(parts: &[Part]) -> Result<Value, TranslationError> {
    if let [Part::Text(text)] = parts {
        return Ok(Value::String(text.clone()));
    }
    let encoded = parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => Ok(json!({"type": "text", "text": text})),
            Part::Image(source) => Ok(json!({"type": "image_url", "image_url": {"url": source.to_url()}})),
            Part::Opaque { format: WireFormat::OpenAi, value } => Ok(value.clone()),
            Part::Opaque { value, .. } => Err(TranslationError::UnsupportedContent {
                kind: opaque_kind(value),
                target: WireFormat::OpenAi,
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(encoded))
}

pub(crate) fn opaque_kind(value: &Value) -> String {
    value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn encode_tool_calls(calls: &[ToolCall]) -> Value {
    Value::Array(
        calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect(),
    )
}

fn encode_message(message: &Message) -> Result<Value, TranslationError> {
    let mut out = Map::new();
    match message.role {
        Role::User => {
            out.insert("role".into(), json!("user"));
            out.insert("content".into(), encode_parts(&message.parts)?);
        }
        Role::Assistant => {
            out.insert("role".into(), json!("assistant"));
            let content = if message.parts.is_empty() {
                Value::Null
            } else {
                encode_parts(&message.parts)?
            };
            out.insert("content".into(), content);
            if !message.tool_calls.is_empty() {
                out.insert("tool_calls".into(), encode_tool_calls(&message.tool_calls));
            }
        }
        Role::Tool => {
            if message.parts.iter().any(|p| !matches!(p, Part::Text(_))) {
                return Err(TranslationError::UnsupportedContent {
                    kind: "non-text tool result".to_string(),
                    target: WireFormat::OpenAi,
                });
            }
            out.insert("role".into(), json!("tool"));
            out.insert(
                "tool_call_id".into(),
                json!(message.tool_call_id.clone().unwrap_or_default()),
            );
            out.insert("content".into(), json!(message.joined_text()));
        }
    }
    if let Some(name) = &message.name {
        if message.role != Role::Tool {
            out.insert("name".into(), json!(name));
        }
    }
    Ok(Value::Object(out))
}

fn encode_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

fn decode_usage(usage: Option<&Value>) -> Option<Usage> {
    let usage = usage?.as_object()?;
    Some(Usage {
        prompt_tokens: opt_u64(usage, "prompt_tokens").unwrap_or(0),
        completion_tokens: opt_u64(usage, "completion_tokens").unwrap_or(0),
    })
}

fn encode_usage(usage: &Usage) -> Value {
    json!({
        "prompt_tokens": usage.prompt_tokens,
        "completion_tokens": usage.completion_tokens,
        "total_tokens": usage.total(),
    })
}

impl WireCodec for OpenAiCodec {
    fn format(&self) -> WireFormat {
        WireFormat::OpenAi
    }

    fn decode_request(&self, body: &Value) -> Result<ChatRequest, TranslationError> {
        let obj = as_object(body)?;
        let mut request = ChatRequest::new(WireFormat::OpenAi, required_str(obj, "model")?);

        let mut system = Vec::new();
        for raw in required_array(obj, "messages")? {
            let leading = request.messages.is_empty();
            if let Some(message) = decode_message(raw, leading, &mut system)? {
                request.messages.push(message);
            }
        }
        if !system.is_empty() {
            request.system = Some(system.join("\n"));
        }

        request.params.temperature = opt_f64(obj, "temperature");
        request.params.top_p = opt_f64(obj, "top_p");
        request.params.max_tokens =
            opt_u64(obj, "max_completion_tokens").or_else(|| opt_u64(obj, "max_tokens"));
        request.params.stop = string_list(obj.get("stop"));
        request.tools = decode_tools(obj.get("tools"))?;
        request.tool_choice = decode_tool_choice(obj.get("tool_choice"));
        request.stream = obj.get("stream").and_then(Value::as_bool).unwrap_or(false);
        request.stream_usage = obj
            .get("stream_options")
            .and_then(|o| o.get("include_usage"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        request.extra = unknown_fields(obj, KNOWN_FIELDS);

        Ok(request)
    }

    fn encode_request(&self, request: &ChatRequest) -> Result<Value, TranslationError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        for message in &request.messages {
            messages.push(encode_message(message)?);
        }

        let mut out = Map::new();
        if let Some(extra) = request.extra_for(WireFormat::OpenAi) {
            out.extend(extra.clone());
        }
        out.insert("model".into(), json!(request.model));
        out.insert("messages".into(), Value::Array(messages));
        if let Some(t) = request.params.temperature {
            out.insert("temperature".into(), json!(t));
        }
        if let Some(p) = request.params.top_p {
            out.insert("top_p".into(), json!(p));
        }
        if let Some(max) = request.params.max_tokens {
            out.insert("max_tokens".into(), json!(max));
        }
        if !request.params.stop.is_empty() {
            out.insert("stop".into(), json!(request.params.stop));
        }
        if !request.tools.is_empty() {
            let keep_extra = request.source == WireFormat::OpenAi;
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    let mut function = Map::new();
                    if keep_extra {
                        function.extend(tool.extra.clone());
                    }
                    function.insert("name".into(), json!(tool.name));
                    if let Some(description) = &tool.description {
                        function.insert("description".into(), json!(description));
                    }
                    function.insert("parameters".into(), tool.parameters.clone());
                    json!({"type": "function", "function": function})
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
        let choice = required_array(obj, "choices")?
            .first()
            .ok_or_else(|| TranslationError::invalid("choices", "empty"))?;
        let message = choice
            .get("message")
            .ok_or_else(|| TranslationError::MissingField("choices[0].message".to_string()))?;

        let content = decode_parts(message.get("content"))?
            .iter()
            .filter_map(Part::as_text)
            .collect();

        Ok(ChatResponse {
            id: opt_str(body, "id"),
            model: opt_str(body, "model"),
            content,
            tool_calls: decode_tool_calls(message.get("tool_calls"))?,
            finish: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(finish_reason_from_str),
            usage: decode_usage(obj.get("usage")),
        })
    }

    fn encode_response(&self, response: &ChatResponse, model: &str) -> Value {
        let mut message = json!({
            "role": "assistant",
            "content": if response.content.is_empty() && !response.tool_calls.is_empty() {
                Value::Null
            } else {
                Value::String(response.content.clone())
            },
        });
        if !response.tool_calls.is_empty() {
            message["tool_calls"] = encode_tool_calls(&response.tool_calls);
        }
        let finish = response
            .finish
            .as_ref()
            .map(|f| finish_reason_to_str(f).to_string())
            .unwrap_or_else(|| "stop".to_string());

        json!({
            "id": response.id.clone().unwrap_or_else(|| generated_id("chatcmpl-")),
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": response.model.as_deref().unwrap_or(model),
            "choices": [{"index": 0, "message": message, "finish_reason": finish}],
            "usage": encode_usage(&response.usage.unwrap_or_default()),
        })
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(OpenAiStreamDecoder::default())
    }

    fn stream_encoder(&self, options: EncoderOptions) -> Box<dyn StreamEncoder> {
        Box::new(OpenAiStreamEncoder::new(options))
    }
}

/// Chat-completion chunks -> canonical events
#[derive(Default)]
pub struct OpenAiStreamDecoder {
    started: bool,
}

impl StreamDecoder for OpenAiStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<StreamEvent>, StreamError> {
        if event.is_done() {
            return Ok(vec![StreamEvent::Done]);
        }
        let chunk: Value = serde_json::from_str(&event.data)
            .map_err(|e| StreamError::Parse(format!("{}: {}", e, event.data)))?;

        if let Some(error) = chunk.get("error") {
            let message = opt_str(error, "message").unwrap_or_else(|| error.to_string());
            return Ok(vec![StreamEvent::Error(message)]);
        }

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start {
                id: opt_str(&chunk, "id"),
                model: opt_str(&chunk, "model"),
            });
        }

        if let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) {
            if let Some(delta) = choice.get("delta") {
                if let Some(text) = delta.get("content").and_then(Value::as_str) {
                    if !text.is_empty() {
                        events.push(StreamEvent::Text(text.to_string()));
                    }
                }
                if let Some(Value::Array(calls)) = delta.get("tool_calls") {
                    for call in calls {
                        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                        let function = call.get("function");
                        if let Some(name) = function.and_then(|f| opt_str(f, "name")) {
                            events.push(StreamEvent::ToolCallStart {
                                index,
                                id: opt_str(call, "id").unwrap_or_else(|| generated_id("call_")),
                                name,
                            });
                        }
                        if let Some(args) = function
                            .and_then(|f| f.get("arguments"))
                            .and_then(Value::as_str)
                        {
                            if !args.is_empty() {
                                events.push(StreamEvent::ToolCallArgs {
                                    index,
                                    fragment: args.to_string(),
                                });
                            }
                        }
                    }
                }
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                events.push(StreamEvent::Finish(finish_reason_from_str(reason)));
            }
        }

        if let Some(usage) = decode_usage(chunk.get("usage")) {
            events.push(StreamEvent::Usage {
                prompt: Some(usage.prompt_tokens),
                completion: Some(usage.completion_tokens),
            });
        }

        Ok(events)
    }
}

/// Canonical events -> chat-completion chunks
pub struct OpenAiStreamEncoder {
    id: String,
    model: String,
    created: i64,
    include_usage: bool,
    role_sent: bool,
    finish_sent: bool,
    usage: Option<Usage>,
    terminated: bool,
}

impl OpenAiStreamEncoder {
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            id: format!("chatcmpl-{}", options.request_id),
            model: options.model,
            created: chrono::Utc::now().timestamp(),
            include_usage: options.include_usage,
            role_sent: false,
            finish_sent: false,
            usage: None,
            terminated: false,
        }
    }

    fn chunk(&self, delta: Value, finish: Option<&str>) -> Bytes {
        let payload = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}],
        });
        format_data(&payload.to_string())
    }

    fn delta(&mut self, mut delta: Value) -> Value {
        if !self.role_sent {
            self.role_sent = true;
            delta["role"] = json!("assistant");
        }
        delta
    }
}

impl StreamEncoder for OpenAiStreamEncoder {
    fn encode(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        match event {
            StreamEvent::Start { model, .. } => {
                if let Some(model) = model {
                    self.model = model.clone();
                }
                Vec::new()
            }
            StreamEvent::Text(text) => {
                let delta = self.delta(json!({"content": text}));
                vec![self.chunk(delta, None)]
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                let delta = self.delta(json!({"tool_calls": [{
                    "index": index,
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": ""}
                }]}));
                vec![self.chunk(delta, None)]
            }
            StreamEvent::ToolCallArgs { index, fragment } => {
                let delta = json!({"tool_calls": [{"index": index, "function": {"arguments": fragment}}]});
                vec![self.chunk(delta, None)]
            }
            StreamEvent::Finish(reason) => {
                self.finish_sent = true;
                vec![self.chunk(json!({}), Some(finish_reason_to_str(reason)))]
            }
            StreamEvent::Usage { prompt, completion } => {
                let usage = self.usage.get_or_insert_with(Usage::default);
                if let Some(p) = prompt {
                    usage.prompt_tokens = *p;
                }
                if let Some(c) = completion {
                    usage.completion_tokens = *c;
                }
                Vec::new()
            }
            StreamEvent::Error(_) | StreamEvent::Done => Vec::new(),
        }
    }

    fn passthrough(&mut self, event: &SseEvent) -> Vec<Bytes> {
        if event.is_done() {
            self.terminated = true;
            return vec![format_done()];
        }
        if !self.include_usage {
            // Usage-only chunks exist because the gateway asked for them.
            if let Ok(chunk) = serde_json::from_str::<Value>(&event.data) {
                let no_choices = chunk
                    .get("choices")
                    .and_then(Value::as_array)
                    .map_or(false, Vec::is_empty);
                if no_choices && chunk.get("usage").is_some() {
                    return Vec::new();
                }
            }
        }
        vec![format_data(&event.data)]
    }

    fn finish(&mut self) -> Vec<Bytes> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;

        let mut frames = Vec::new();
        if !self.finish_sent {
            self.finish_sent = true;
            frames.push(self.chunk(json!({}), Some("stop")));
        }
        if self.include_usage {
            if let Some(usage) = &self.usage {
                let payload = json!({
                    "id": self.id,
                    "object": "chat.completion.chunk",
                    "created": self.created,
                    "model": self.model,
                    "choices": [],
                    "usage": encode_usage(usage),
                });
                frames.push(format_data(&payload.to_string()));
            }
        }
        frames.push(format_done());
        frames
    }

    fn error(&mut self, error: &StreamError) -> Bytes {
        self.terminated = true;
        let payload = json!({
            "error": {
                "message": error.to_string(),
                "type": "upstream_error",
                "code": "stream_error",
            }
        });
        format_data(&payload.to_string())
    }
}
