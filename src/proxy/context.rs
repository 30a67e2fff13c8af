//! Per-request context and logging
//!
//! Structured logging with a correlation id so every attempt of one request,
//! including failovers, can be traced back to the same caller request.

use std::time::Instant;

use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

use crate::translate::WireFormat;

/// One failed dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    pub tenant: String,
    pub deployment: String,
    pub reason: String,
}

/// Context for tracking a request through the gateway
///
/// Owned by the request that created it; discarded when the response
/// completes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Short id for log correlation
    pub request_id: String,
    pub start_time: Instant,
    /// Format the caller speaks
    pub format: WireFormat,
    /// Public endpoint being served
    pub endpoint: &'static str,
    pub model: String,
    pub streaming: bool,
    /// 1-based number of the current dispatch attempt
    pub attempt: usize,
    /// Attempts that failed before the current one
    pub history: Vec<FailedAttempt>,
}

impl RequestContext {
    pub fn new(format: WireFormat, endpoint: &'static str, model: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string()[..8].to_string(),
            start_time: Instant::now(),
            format,
            endpoint,
            model: model.into(),
            streaming: false,
            attempt: 0,
            history: Vec::new(),
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    pub fn log_request_start(&self) {
        info!(
            request_id = %self.request_id,
            endpoint = %self.endpoint,
            format = %self.format,
            model = %self.model,
            streaming = %self.streaming,
            "Request started"
        );
    }

    /// Start the next attempt against `deployment`
    pub fn log_attempt(&mut self, tenant: &str, deployment: &str) {
        self.attempt += 1;
        debug!(
            request_id = %self.request_id,
            attempt = self.attempt,
            tenant = %tenant,
            deployment = %deployment,
            elapsed_ms = %self.elapsed_ms(),
            "Dispatching to upstream"
        );
    }

    /// Record a failed attempt; the caller moves on to the next candidate.
    pub fn log_failover(&mut self, tenant: &str, deployment: &str, reason: &str) {
        warn!(
            request_id = %self.request_id,
            attempt = self.attempt,
            tenant = %tenant,
            deployment = %deployment,
            model = %self.model,
            reason = %reason,
            "Attempt failed, failing over"
        );
        metrics::counter!("switchyard_failovers_total", "model" => self.model.clone()).increment(1);
        self.history.push(FailedAttempt {
            tenant: tenant.to_string(),
            deployment: deployment.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn log_completed(&self, tenant: &str, prompt_tokens: u64, completion_tokens: u64) {
        info!(
            request_id = %self.request_id,
            endpoint = %self.endpoint,
            model = %self.model,
            tenant = %tenant,
            streaming = %self.streaming,
            attempts = self.attempt,
            prompt_tokens,
            completion_tokens,
            elapsed_ms = %self.elapsed_ms(),
            "Request completed"
        );
    }

    pub fn log_stream_started(&self, tenant: &str) {
        info!(
            request_id = %self.request_id,
            model = %self.model,
            tenant = %tenant,
            attempts = self.attempt,
            elapsed_ms = %self.elapsed_ms(),
            "Streaming response started"
        );
    }

    pub fn log_error(&self, error: &str) {
        error!(
            request_id = %self.request_id,
            endpoint = %self.endpoint,
            model = %self.model,
            streaming = %self.streaming,
            attempts = self.attempt,
            failovers = self.history.len(),
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Request failed"
        );
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "gateway_request",
            request_id = %self.request_id,
            endpoint = %self.endpoint,
            model = %self.model,
            streaming = %self.streaming,
        )
    }
}
