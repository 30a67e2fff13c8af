//! Token counting module
//!
//! Fallback token estimates for responses whose upstream reported no usage.

pub mod counter;

pub use counter::{count_request_tokens, count_tokens};
