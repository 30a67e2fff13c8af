//! Streamed response relay
//!
//! Pulls upstream chunks, parses SSE, decodes each event into canonical
//! [`StreamEvent`]s and pushes target-format frames downstream as soon as
//! they are known. The relay never buffers the whole response.
//!
//! Every downstream stream ends with exactly one terminal frame: the format's
//! normal end marker, or a single error frame. Dropping the relay (the caller
//! went away) drops the upstream body with it.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::streaming::{SseEvent, SseParser, StreamError};

use super::ir::{FinishReason, Usage};
use super::{StreamDecoder, StreamEncoder};

/// Canonical incremental event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Start {
        id: Option<String>,
        model: Option<String>,
    },
    Text(String),
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolCallArgs {
        index: usize,
        fragment: String,
    },
    Finish(FinishReason),
    /// Token counts known so far; later values replace earlier ones
    Usage {
        prompt: Option<u64>,
        completion: Option<u64>,
    },
    /// Upstream reported a terminal error
    Error(String),
    /// Upstream signalled the end of the response
    Done,
}

/// What a completed stream carried, for usage accounting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub text: String,
    pub tool_arguments: String,
    pub usage: Usage,
    pub usage_reported: bool,
    pub finish: Option<FinishReason>,
}

impl StreamSummary {
    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Text(text) => self.text.push_str(text),
            StreamEvent::ToolCallArgs { fragment, .. } => self.tool_arguments.push_str(fragment),
            StreamEvent::Finish(reason) => self.finish = Some(reason.clone()),
            StreamEvent::Usage { prompt, completion } => {
                if let Some(p) = prompt {
                    self.usage.prompt_tokens = *p;
                    self.usage_reported = true;
                }
                if let Some(c) = completion {
                    self.usage.completion_tokens = *c;
                    self.usage_reported = true;
                }
            }
            _ => {}
        }
    }
}

/// How one stream is translated
pub struct RelayPlan {
    pub request_id: String,
    pub decoder: Box<dyn StreamDecoder>,
    pub encoder: Box<dyn StreamEncoder>,
    /// Upstream already speaks the caller's format; frames are re-emitted
    pub passthrough: bool,
    /// Maximum silence between upstream chunks
    pub idle_timeout: Duration,
}

enum Step {
    Frames(Vec<Bytes>),
    Done(Vec<Bytes>),
}

impl RelayPlan {
    fn step(&mut self, sse: &SseEvent, summary: &mut StreamSummary) -> Result<Step, StreamError> {
        let events = self.decoder.decode(sse)?;

        let mut done = false;
        for event in &events {
            match event {
                StreamEvent::Error(message) => return Err(StreamError::Provider(message.clone())),
                StreamEvent::Done => done = true,
                other => summary.observe(other),
            }
        }

        let frames = if self.passthrough {
            self.encoder.passthrough(sse)
        } else {
            events.iter().flat_map(|e| self.encoder.encode(e)).collect()
        };

        Ok(if done { Step::Done(frames) } else { Step::Frames(frames) })
    }
}

/// Logs streams that end without reaching a terminal frame.
struct RelayGuard {
    request_id: String,
    finished: bool,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!(request_id = %self.request_id, "Stream consumer went away, closing upstream");
            metrics::counter!("switchyard_streams_cancelled_total").increment(1);
        }
    }
}

/// Translate an upstream byte stream into downstream frames.
///
/// `on_complete` runs once after the terminal frame of a successful stream;
/// it does not run for failed or abandoned streams.
pub fn relay<S, F>(
    mut upstream: S,
    mut plan: RelayPlan,
    on_complete: F,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = Result<Bytes, StreamError>> + Unpin + Send + 'static,
    F: FnOnce(StreamSummary) + Send + 'static,
{
    async_stream::stream! {
        let mut guard = RelayGuard { request_id: plan.request_id.clone(), finished: false };
        let mut parser = SseParser::new();
        let mut summary = StreamSummary::default();

        'upstream: loop {
            let chunk = match tokio::time::timeout(plan.idle_timeout, upstream.next()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break 'upstream,
                Err(_) => Err(StreamError::IdleTimeout(plan.idle_timeout.as_secs())),
            };

            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(request_id = %plan.request_id, error = %e, "Upstream stream failed");
                    guard.finished = true;
                    yield Ok(plan.encoder.error(&e));
                    return;
                }
            };

            for sse in parser.feed(&bytes) {
                match plan.step(&sse, &mut summary) {
                    Ok(Step::Frames(frames)) => {
                        for frame in frames {
                            yield Ok(frame);
                        }
                    }
                    Ok(Step::Done(frames)) => {
                        for frame in frames {
                            yield Ok(frame);
                        }
                        break 'upstream;
                    }
                    Err(e) => {
                        warn!(request_id = %plan.request_id, error = %e, "Upstream stream reported an error");
                        guard.finished = true;
                        yield Ok(plan.encoder.error(&e));
                        return;
                    }
                }
            }
        }

        if let Some(sse) = parser.finish() {
            match plan.step(&sse, &mut summary) {
                Ok(Step::Frames(frames)) | Ok(Step::Done(frames)) => {
                    for frame in frames {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    guard.finished = true;
                    yield Ok(plan.encoder.error(&e));
                    return;
                }
            }
        }

        for frame in plan.encoder.finish() {
            yield Ok(frame);
        }
        guard.finished = true;
        // Release the upstream body before accounting.
        drop(upstream);
        on_complete(summary);
    }
}
