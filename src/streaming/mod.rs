//! SSE (Server-Sent Events) streaming utilities
//!
//! Parsing of upstream SSE byte streams into events, and framing helpers for
//! the downstream side.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

/// Upstream body as a stream of byte chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// Downstream terminal marker of OpenAI-style streams
pub const DONE_MARKER: &str = "[DONE]";

/// Failures while relaying a stream
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("upstream connection failed: {0}")]
    Transport(String),

    #[error("upstream stream idle for {0} s")]
    IdleTimeout(u64),

    #[error("malformed upstream event: {0}")]
    Parse(String),

    #[error("upstream error: {0}")]
    Provider(String),
}

/// Adapt a reqwest body stream to a [`ByteStream`].
pub fn from_response(response: reqwest::Response) -> ByteStream {
    use futures::StreamExt;

    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::Transport(e.to_string()))),
    )
}

/// One parsed SSE event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field, if present
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_MARKER
    }
}

/// Incremental SSE parser.
///
/// Bytes arrive in chunks that do not align with line or event boundaries;
/// partial input is kept until it completes. Lines are split on raw bytes so a
/// multi-byte character split across chunks is decoded intact.
///
/// # Example
/// ```
/// use switchyard::streaming::SseParser;
///
/// let mut parser = SseParser::new();
///
/// assert!(parser.feed(b"event: ping\ndata: {\"a\"").is_empty());
///
/// let events = parser.feed(b":1}\n\n");
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].event.as_deref(), Some("ping"));
/// assert_eq!(events[0].data, "{\"a\":1}");
/// ```
#[derive(Debug, Default)]
pub struct SseParser {
    incomplete: Vec<u8>,
    pending: Option<SseEvent>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.incomplete.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.incomplete.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.incomplete.drain(..=pos).collect();
            let decoded = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = decoded.strip_suffix('\r').unwrap_or(&decoded);

            if line.is_empty() {
                if let Some(event) = self.take_pending() {
                    events.push(event);
                }
                continue;
            }
            self.apply_line(line);
        }

        events
    }

    /// Flush an event left open by a stream that ended without a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.incomplete.is_empty() {
            let raw = std::mem::take(&mut self.incomplete);
            let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
            if !line.is_empty() {
                self.apply_line(&line);
            }
        }
        self.take_pending()
    }

    /// Whether undelivered input is buffered
    pub fn has_incomplete(&self) -> bool {
        !self.incomplete.is_empty() || self.pending.is_some()
    }

    /// Events without data are dropped, not dispatched.
    fn take_pending(&mut self) -> Option<SseEvent> {
        self.pending.take().filter(|event| !event.data.is_empty())
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.pending.get_or_insert_with(SseEvent::default).event = Some(value.to_string());
            }
            "data" => {
                let event = self.pending.get_or_insert_with(SseEvent::default);
                if !event.data.is_empty() {
                    event.data.push('\n');
                }
                event.data.push_str(value);
            }
            _ => {}
        }
    }
}

/// `data: <payload>\n\n`
pub fn format_data(payload: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", payload))
}

/// `event: <name>\ndata: <payload>\n\n`
pub fn format_event(name: &str, payload: &str) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", name, payload))
}

/// `data: [DONE]\n\n`
pub fn format_done() -> Bytes {
    format_data(DONE_MARKER)
}
