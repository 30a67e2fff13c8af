//! Usage accounting
//!
//! One [`UsageFact`] per completed request, handed to a [`UsageSink`].
//! Recording never blocks or fails the request that produced the fact.

pub mod sink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ModelPrice;

pub use sink::{JsonLinesUsageSink, TracingUsageSink};
#[cfg(any(test, feature = "test-utils"))]
pub use sink::MemoryUsageSink;

/// Token usage and derived cost of one completed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageFact {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub tenant: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub streamed: bool,
}

impl UsageFact {
    pub fn new(
        request_id: impl Into<String>,
        model: impl Into<String>,
        tenant: impl Into<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
        price: ModelPrice,
        streamed: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: Utc::now(),
            model: model.into(),
            tenant: tenant.into(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost: cost(prompt_tokens, completion_tokens, price),
            streamed,
        }
    }
}

/// Price of a request in the pricing table's currency
pub fn cost(prompt_tokens: u64, completion_tokens: u64, price: ModelPrice) -> f64 {
    prompt_tokens as f64 / 1_000_000.0 * price.input_per_million
        + completion_tokens as f64 / 1_000_000.0 * price.output_per_million
}

/// Destination of usage facts
pub trait UsageSink: Send + Sync {
    /// Fire-and-forget: must return immediately and never fail the caller.
    fn record(&self, fact: UsageFact);
}
