//! Gemini generateContent format
//!
//! The model and the streaming flag travel in the URL, not the body. Inbound
//! routes copy both into the body as `model` and `stream` before decoding, and
//! the backend adapter strips them again before dispatch.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::streaming::{format_data, SseEvent, StreamError};

use super::ir::{
    ChatRequest, ChatResponse, FinishReason, ImageSource, Message, Part, Role, ToolCall,
    ToolChoice, ToolDecl, Usage,
};
use super::openai::opaque_kind;
use super::{
    as_object, generated_id, opt_f64, opt_str, opt_u64, required_array, string_list,
    unknown_fields, EncoderOptions, StreamDecoder, StreamEncoder, StreamEvent, TranslationError,
    WireCodec, WireFormat,
};

const KNOWN_FIELDS: &[&str] = &[
    "model",
    "stream",
    "contents",
    "systemInstruction",
    "generationConfig",
    "tools",
    "toolConfig",
];

pub struct GeminiCodec;

fn finish_reason_to_str(reason: &FinishReason) -> &str {
    match reason {
        FinishReason::Stop | FinishReason::StopSequence | FinishReason::ToolCalls => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ContentFilter => "SAFETY",
        FinishReason::Other(other) => other.as_str(),
    }
}

fn finish_reason_from_str(reason: &str, has_tool_calls: bool) -> FinishReason {
    match reason {
        "STOP" if has_tool_calls => FinishReason::ToolCalls,
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        other => FinishReason::Other(other.to_string()),
    }
}

/// Media type of an image URL, judged by its extension
fn image_mime_from_url(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn decode_data_part(part: &Value, key: &str) -> Option<Part> {
    let data = part.get(key)?;
    let mime = opt_str(data, "mimeType").unwrap_or_default();
    if !mime.starts_with("image/") {
        return Some(Part::Opaque {
            format: WireFormat::Gemini,
            value: part.clone(),
        });
    }
    let source = if key == "inlineData" {
        ImageSource::Base64 {
            media_type: mime,
            data: opt_str(data, "data").unwrap_or_default(),
        }
    } else {
        ImageSource::Url(opt_str(data, "fileUri").unwrap_or_default())
    };
    Some(Part::Image(source))
}

fn function_response_parts(response: Option<&Value>) -> Vec<Part> {
    match response {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => vec![Part::Text(text.clone())],
        Some(other) => vec![Part::Text(other.to_string())],
    }
}

/// Ids of calls still waiting for a result, per function name.
///
/// Gemini may omit call ids. Id-less calls get a generated id, and id-less
/// results take the oldest pending id of the same name.
#[derive(Default)]
struct PendingCalls(HashMap<String, VecDeque<String>>);

impl PendingCalls {
    fn call_id(&mut self, call: &Value, name: &str) -> String {
        let id = opt_str(call, "id").unwrap_or_else(|| generated_id("call_"));
        self.0.entry(name.to_string()).or_default().push_back(id.clone());
        id
    }

    fn result_id(&mut self, response: &Value, name: &str) -> String {
        let pending = self.0.get_mut(name);
        match opt_str(response, "id") {
            Some(id) => {
                if let Some(pending) = pending {
                    pending.retain(|p| p != &id);
                }
                id
            }
            None => pending
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| generated_id("call_")),
        }
    }
}

fn decode_content(
    raw: &Value,
    pending: &mut PendingCalls,
    out: &mut Vec<Message>,
) -> Result<(), TranslationError> {
    let role = match raw.get("role").and_then(Value::as_str) {
        None | Some("user") | Some("function") => Role::User,
        Some("model") => Role::Assistant,
        Some(other) => return Err(TranslationError::UnsupportedRole(other.to_string())),
    };
    let parts = raw
        .get("parts")
        .and_then(Value::as_array)
        .ok_or_else(|| TranslationError::MissingField("contents[].parts".to_string()))?;

    let mut message = Message::new(role, Vec::new());
    for part in parts {
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            message.parts.push(Part::Opaque {
                format: WireFormat::Gemini,
                value: part.clone(),
            });
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            message.parts.push(Part::Text(text.to_string()));
        } else if let Some(call) = part.get("functionCall") {
            let name = opt_str(call, "name")
                .ok_or_else(|| TranslationError::MissingField("functionCall.name".to_string()))?;
            message.tool_calls.push(ToolCall {
                id: pending.call_id(call, &name),
                name,
                arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
            });
        } else if let Some(response) = part.get("functionResponse") {
            let name = opt_str(response, "name").ok_or_else(|| {
                TranslationError::MissingField("functionResponse.name".to_string())
            })?;
            out.push(Message {
                tool_call_id: Some(pending.result_id(response, &name)),
                name: Some(name),
                ..Message::new(Role::Tool, function_response_parts(response.get("response")))
            });
        } else if let Some(decoded) = decode_data_part(part, "inlineData")
            .or_else(|| decode_data_part(part, "fileData"))
        {
            message.parts.push(decoded);
        } else {
            message.parts.push(Part::Opaque {
                format: WireFormat::Gemini,
                value: part.clone(),
            });
        }
    }

    if !message.parts.is_empty() || !message.tool_calls.is_empty() {
        out.push(message);
    }
    Ok(())
}

fn decode_system(system: Option<&Value>) -> Option<String> {
    match system? {
        Value::String(text) => Some(text.clone()),
        value => {
            let texts: Vec<&str> = value
                .get("parts")?
                .as_array()?
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            Some(texts.join("\n"))
        }
    }
}

fn decode_tools(tools: Option<&Value>) -> Result<Vec<ToolDecl>, TranslationError> {
    let Some(Value::Array(tools)) = tools else {
        return Ok(Vec::new());
    };
    let mut decls = Vec::new();
    for tool in tools {
        let Some(Value::Array(functions)) = tool.get("functionDeclarations") else {
            continue;
        };
        for function in functions {
            let obj = as_object(function)?;
            decls.push(ToolDecl {
                name: opt_str(function, "name").ok_or_else(|| {
                    TranslationError::MissingField("functionDeclarations[].name".to_string())
                })?,
                description: opt_str(function, "description"),
                parameters: obj
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                extra: unknown_fields(obj, &["name", "description", "parameters"]),
            });
        }
    }
    Ok(decls)
}

fn decode_tool_choice(config: Option<&Value>) -> Option<ToolChoice> {
    let calling = config?.get("functionCallingConfig")?;
    match calling.get("mode").and_then(Value::as_str)? {
        "AUTO" => Some(ToolChoice::Auto),
        "NONE" => Some(ToolChoice::None),
        "ANY" => {
            let allowed = string_list(calling.get("allowedFunctionNames"));
            match allowed.as_slice() {
                [single] => Some(ToolChoice::Tool(single.clone())),
                _ => Some(ToolChoice::Required),
            }
        }
        _ => None,
    }
}

fn encode_part(part: &Part) -> Result<Value, TranslationError> {
    match part {
        Part::Text(text) => Ok(json!({"text": text})),
        Part::Image(ImageSource::Base64 { media_type, data }) => {
            Ok(json!({"inlineData": {"mimeType": media_type, "data": data}}))
        }
        Part::Image(ImageSource::Url(url)) => match image_mime_from_url(url) {
            Some(mime) => Ok(json!({"fileData": {"mimeType": mime, "fileUri": url}})),
            None => Err(TranslationError::UnsupportedContent {
                kind: "image URL of unknown type".to_string(),
                target: WireFormat::Gemini,
            }),
        },
        Part::Opaque { format: WireFormat::Gemini, value } => Ok(value.clone()),
        Part::Opaque { value, .. } => Err(TranslationError::UnsupportedContent {
            kind: opaque_kind(value),
            target: WireFormat::Gemini,
        }),
    }
}

/// Tool results are keyed by function name; recover it from the call id.
fn encode_function_response(message: &Message, names: &HashMap<&str, &str>) -> Value {
    let id = message.tool_call_id.as_deref().unwrap_or_default();
    let name = message
        .name
        .as_deref()
        .or_else(|| names.get(id).copied())
        .unwrap_or(id);
    let text = message.joined_text();
    let response = match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({"content": text}),
    };
    json!({"functionResponse": {"name": name, "response": response}})
}

fn encode_generation_config(request: &ChatRequest) -> Option<Value> {
    let params = &request.params;
    let mut config = Map::new();
    if let Some(t) = params.temperature {
        config.insert("temperature".into(), json!(t));
    }
    if let Some(p) = params.top_p {
        config.insert("topP".into(), json!(p));
    }
    if let Some(k) = params.top_k {
        config.insert("topK".into(), json!(k));
    }
    if let Some(max) = params.max_tokens {
        config.insert("maxOutputTokens".into(), json!(max));
    }
    if !params.stop.is_empty() {
        config.insert("stopSequences".into(), json!(params.stop));
    }
    (!config.is_empty()).then_some(Value::Object(config))
}

fn encode_tool_choice(choice: &ToolChoice) -> Value {
    let calling = match choice {
        ToolChoice::Auto => json!({"mode": "AUTO"}),
        ToolChoice::None => json!({"mode": "NONE"}),
        ToolChoice::Required => json!({"mode": "ANY"}),
        ToolChoice::Tool(name) => json!({"mode": "ANY", "allowedFunctionNames": [name]}),
    };
    json!({"functionCallingConfig": calling})
}

fn decode_usage(usage: Option<&Value>) -> Option<Usage> {
    let usage = usage?.as_object()?;
    Some(Usage {
        prompt_tokens: opt_u64(usage, "promptTokenCount").unwrap_or(0),
        completion_tokens: opt_u64(usage, "candidatesTokenCount").unwrap_or(0),
    })
}

fn encode_usage(usage: &Usage) -> Value {
    json!({
        "promptTokenCount": usage.prompt_tokens,
        "candidatesTokenCount": usage.completion_tokens,
        "totalTokenCount": usage.total(),
    })
}

impl WireCodec for GeminiCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Gemini
    }

    fn decode_request(&self, body: &Value) -> Result<ChatRequest, TranslationError> {
        let obj = as_object(body)?;
        let mut request =
            ChatRequest::new(WireFormat::Gemini, opt_str(body, "model").unwrap_or_default());

        request.system = decode_system(obj.get("systemInstruction"));
        let mut pending = PendingCalls::default();
        for raw in required_array(obj, "contents")? {
            decode_content(raw, &mut pending, &mut request.messages)?;
        }

        if let Some(config) = obj.get("generationConfig").and_then(Value::as_object) {
            request.params.temperature = opt_f64(config, "temperature");
            request.params.top_p = opt_f64(config, "topP");
            request.params.top_k = opt_u64(config, "topK");
            request.params.max_tokens = opt_u64(config, "maxOutputTokens");
            request.params.stop = string_list(config.get("stopSequences"));
        }
        request.tools = decode_tools(obj.get("tools"))?;
        request.tool_choice = decode_tool_choice(obj.get("toolConfig"));
        request.stream = obj.get("stream").and_then(Value::as_bool).unwrap_or(false);
        request.stream_usage = true;
        request.extra = unknown_fields(obj, KNOWN_FIELDS);

        Ok(request)
    }

    fn encode_request(&self, request: &ChatRequest) -> Result<Value, TranslationError> {
        let names: HashMap<&str, &str> = request
            .messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .map(|c| (c.id.as_str(), c.name.as_str()))
            .collect();

        let mut contents: Vec<Value> = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let (role, parts) = match message.role {
                Role::Tool => ("user", vec![encode_function_response(message, &names)]),
                Role::User | Role::Assistant => {
                    let mut parts: Vec<Value> =
                        message.parts.iter().map(encode_part).collect::<Result<_, _>>()?;
                    for call in &message.tool_calls {
                        parts.push(json!({"functionCall": {"name": call.name, "args": call.arguments}}));
                    }
                    let role = if message.role == Role::User { "user" } else { "model" };
                    (role, parts)
                }
            };
            if parts.is_empty() {
                continue;
            }
            match contents.last_mut() {
                Some(last) if last["role"] == role => {
                    if let Some(existing) = last["parts"].as_array_mut() {
                        existing.extend(parts);
                    }
                }
                _ => contents.push(json!({"role": role, "parts": parts})),
            }
        }

        let mut out = Map::new();
        if let Some(extra) = request.extra_for(WireFormat::Gemini) {
            out.extend(extra.clone());
        }
        out.insert("contents".into(), Value::Array(contents));
        if let Some(system) = &request.system {
            out.insert("systemInstruction".into(), json!({"parts": [{"text": system}]}));
        }
        if let Some(config) = encode_generation_config(request) {
            out.insert("generationConfig".into(), config);
        }
        if !request.tools.is_empty() {
            let keep_extra = request.source == WireFormat::Gemini;
            let declarations: Vec<Value> = request
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
                    decl.insert("parameters".into(), tool.parameters.clone());
                    Value::Object(decl)
                })
                .collect();
            out.insert("tools".into(), json!([{"functionDeclarations": declarations}]));
        }
        if let Some(choice) = &request.tool_choice {
            out.insert("toolConfig".into(), encode_tool_choice(choice));
        }
        Ok(Value::Object(out))
    }

    fn decode_response(&self, body: &Value) -> Result<ChatResponse, TranslationError> {
        let obj = as_object(body)?;
        let mut response = ChatResponse {
            id: opt_str(body, "responseId"),
            model: opt_str(body, "modelVersion"),
            content: String::new(),
            tool_calls: Vec::new(),
            finish: None,
            usage: decode_usage(obj.get("usageMetadata")),
        };

        let candidate = obj
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first());
        let Some(candidate) = candidate else {
            if body.get("promptFeedback").and_then(|f| f.get("blockReason")).is_some() {
                response.finish = Some(FinishReason::ContentFilter);
            }
            return Ok(response);
        };

        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array);
        for part in parts.into_iter().flatten() {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                response.content.push_str(text);
            } else if let Some(call) = part.get("functionCall") {
                let name = opt_str(call, "name").unwrap_or_default();
                response.tool_calls.push(ToolCall {
                    id: opt_str(call, "id").unwrap_or_else(|| generated_id("call_")),
                    name,
                    arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                });
            }
        }
        response.finish = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(|r| finish_reason_from_str(r, !response.tool_calls.is_empty()));

        Ok(response)
    }

    fn encode_response(&self, response: &ChatResponse, model: &str) -> Value {
        let mut parts = Vec::new();
        if !response.content.is_empty() {
            parts.push(json!({"text": response.content}));
        }
        for call in &response.tool_calls {
            parts.push(json!({"functionCall": {"name": call.name, "args": call.arguments}}));
        }
        let finish = response
            .finish
            .as_ref()
            .map(finish_reason_to_str)
            .unwrap_or("STOP");

        json!({
            "candidates": [{
                "content": {"role": "model", "parts": parts},
                "finishReason": finish,
                "index": 0,
            }],
            "usageMetadata": encode_usage(&response.usage.unwrap_or_default()),
            "modelVersion": response.model.as_deref().unwrap_or(model),
            "responseId": response.id.clone().unwrap_or_else(|| generated_id("")),
        })
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(GeminiStreamDecoder::default())
    }

    fn stream_encoder(&self, options: EncoderOptions) -> Box<dyn StreamEncoder> {
        Box::new(GeminiStreamEncoder::new(options))
    }
}

/// Each chunk is a partial response; the stream ends with the connection.
#[derive(Default)]
pub struct GeminiStreamDecoder {
    started: bool,
    tool_calls: usize,
}

impl StreamDecoder for GeminiStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<StreamEvent>, StreamError> {
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
                id: opt_str(&chunk, "responseId"),
                model: opt_str(&chunk, "modelVersion"),
            });
        }

        let candidate = chunk.get("candidates").and_then(|c| c.get(0));
        let parts = candidate
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array);
        for part in parts.into_iter().flatten() {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    events.push(StreamEvent::Text(text.to_string()));
                }
            } else if let Some(call) = part.get("functionCall") {
                let index = self.tool_calls;
                self.tool_calls += 1;
                let name = opt_str(call, "name").unwrap_or_default();
                events.push(StreamEvent::ToolCallStart {
                    index,
                    id: opt_str(call, "id").unwrap_or_else(|| generated_id("call_")),
                    name,
                });
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                events.push(StreamEvent::ToolCallArgs {
                    index,
                    fragment: args.to_string(),
                });
            }
        }

        if let Some(reason) = candidate
            .and_then(|c| c.get("finishReason"))
            .and_then(Value::as_str)
        {
            events.push(StreamEvent::Finish(finish_reason_from_str(
                reason,
                self.tool_calls > 0,
            )));
        }
        if let Some(usage) = decode_usage(chunk.get("usageMetadata")) {
            events.push(StreamEvent::Usage {
                prompt: Some(usage.prompt_tokens),
                completion: Some(usage.completion_tokens),
            });
        }
        Ok(events)
    }
}

struct PendingCall {
    name: String,
    arguments: String,
}

/// Canonical events -> Gemini stream chunks
///
/// Text is forwarded as it arrives. Function calls are only complete once all
/// argument fragments are in, so they go out in the closing chunk.
pub struct GeminiStreamEncoder {
    id: String,
    model: String,
    pending: Vec<PendingCall>,
    slot_by_index: HashMap<usize, usize>,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    terminated: bool,
}

impl GeminiStreamEncoder {
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            id: options.request_id,
            model: options.model,
            pending: Vec::new(),
            slot_by_index: HashMap::new(),
            finish: None,
            usage: None,
            terminated: false,
        }
    }

    fn chunk(&self, parts: Vec<Value>, finish: Option<&str>, usage: Option<&Usage>) -> Bytes {
        let mut candidate = json!({
            "content": {"role": "model", "parts": parts},
            "index": 0,
        });
        if let Some(finish) = finish {
            candidate["finishReason"] = json!(finish);
        }
        let mut payload = json!({
            "candidates": [candidate],
            "modelVersion": self.model,
            "responseId": self.id,
        });
        if let Some(usage) = usage {
            payload["usageMetadata"] = encode_usage(usage);
        }
        format_data(&payload.to_string())
    }
}

impl StreamEncoder for GeminiStreamEncoder {
    fn encode(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        match event {
            StreamEvent::Start { model, .. } => {
                if let Some(model) = model {
                    self.model = model.clone();
                }
            }
            StreamEvent::Text(text) => {
                return vec![self.chunk(vec![json!({"text": text})], None, None)];
            }
            StreamEvent::ToolCallStart { index, name, .. } => {
                self.slot_by_index.insert(*index, self.pending.len());
                self.pending.push(PendingCall {
                    name: name.clone(),
                    arguments: String::new(),
                });
            }
            StreamEvent::ToolCallArgs { index, fragment } => {
                if let Some(slot) = self.slot_by_index.get(index) {
                    if let Some(call) = self.pending.get_mut(*slot) {
                        call.arguments.push_str(fragment);
                    }
                }
            }
            StreamEvent::Finish(reason) => self.finish = Some(reason.clone()),
            StreamEvent::Usage { prompt, completion } => {
                let usage = self.usage.get_or_insert_with(Usage::default);
                if let Some(p) = prompt {
                    usage.prompt_tokens = *p;
                }
                if let Some(c) = completion {
                    usage.completion_tokens = *c;
                }
            }
            StreamEvent::Error(_) | StreamEvent::Done => {}
        }
        Vec::new()
    }

    fn passthrough(&mut self, event: &SseEvent) -> Vec<Bytes> {
        // Upstream chunks already carry their own closing chunk.
        self.terminated = true;
        vec![format_data(&event.data)]
    }

    fn finish(&mut self) -> Vec<Bytes> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;

        let parts: Vec<Value> = self
            .pending
            .drain(..)
            .map(|call| {
                let args = serde_json::from_str::<Value>(&call.arguments)
                    .unwrap_or_else(|_| json!({}));
                json!({"functionCall": {"name": call.name, "args": args}})
            })
            .collect();
        let finish = self
            .finish
            .as_ref()
            .map(finish_reason_to_str)
            .unwrap_or("STOP")
            .to_string();
        vec![self.chunk(parts, Some(&finish), self.usage.as_ref())]
    }

    fn error(&mut self, error: &StreamError) -> Bytes {
        self.terminated = true;
        let payload = json!({
            "error": {"code": 502, "message": error.to_string(), "status": "UNAVAILABLE"}
        });
        format_data(&payload.to_string())
    }
}
