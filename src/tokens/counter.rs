//! Token counter implementation
//!
//! Uses tiktoken-rs to estimate token counts when an upstream stream ends
//! without reporting usage. Every model is counted with `cl100k_base`; the
//! estimate only has to be close, not exact, for non-OpenAI models.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

use crate::translate::ir::ChatRequest;

/// Overhead of one chat message: `<|start|>{role}\n{content}<|end|>\n`
const TOKENS_PER_MESSAGE: u64 = 3;
/// Every reply is primed with `<|start|>assistant<|message|>`
const REPLY_PRIMING_TOKENS: u64 = 3;

static ENCODER: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(error = %e, "cl100k encoder unavailable, falling back to length estimate");
        None
    }
});

/// Count tokens in a text string
pub fn count_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    match ENCODER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
        // Roughly four characters per token for English text
        None => (text.chars().count() as u64).div_ceil(4),
    }
}

/// Estimated prompt tokens of a chat request
pub fn count_request_tokens(request: &ChatRequest) -> u64 {
    let system = request
        .system
        .as_deref()
        .map(|s| TOKENS_PER_MESSAGE + count_tokens(s))
        .unwrap_or(0);

    let messages: u64 = request
        .messages
        .iter()
        .map(|message| {
            let arguments: u64 = message
                .tool_calls
                .iter()
                .map(|call| count_tokens(&call.name) + count_tokens(&call.arguments.to_string()))
                .sum();
            TOKENS_PER_MESSAGE + count_tokens(&message.joined_text()) + arguments
        })
        .sum();

    system + messages + REPLY_PRIMING_TOKENS
}
