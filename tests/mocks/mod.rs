//! Mock infrastructure for testing external services
//!
//! This module provides mock servers and test helpers for external dependencies:
//! - Tenant OAuth token endpoints
//! - Model deployments of the three backend families (OpenAI, Bedrock
//!   Anthropic, Gemini)
//!
//! All mocks are designed to be reusable across different test files and support
//! various response scenarios (success, errors, edge cases).

pub mod backend;
pub mod token_endpoint;

pub use backend::*;
pub use token_endpoint::*;
