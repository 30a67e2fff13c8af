//! Proxy module
//!
//! Dispatches inbound requests to upstream deployments with failover.

pub mod context;
pub mod orchestrator;

pub use context::{FailedAttempt, RequestContext};
pub use orchestrator::{chat, embeddings, REQUEST_ID_HEADER};
