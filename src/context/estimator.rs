//! Token estimation for backends without a counting endpoint.

use crate::llm::{Message, Part};

/// Estimates token count for messages.
///
/// Uses a simple heuristic of ~4 characters per token, which provides
/// a reasonable approximation for most English text and code.
pub struct TokenEstimator;

impl TokenEstimator {
    const CHARS_PER_TOKEN: usize = 4;

    /// Overhead tokens per message (role, formatting).
    const MESSAGE_OVERHEAD: usize = 4;

    const FUNCTION_CALL_OVERHEAD: usize = 20;

    const FUNCTION_RESPONSE_OVERHEAD: usize = 10;

    #[must_use]
    pub const fn estimate_text(text: &str) -> usize {
        text.len().div_ceil(Self::CHARS_PER_TOKEN)
    }

    #[must_use]
    pub fn estimate_message(message: &Message) -> usize {
        message.parts.iter().map(Self::estimate_part).sum::<usize>() + Self::MESSAGE_OVERHEAD
    }

    #[must_use]
    pub fn estimate_part(part: &Part) -> usize {
        match part {
            Part::Text { text } | Part::Thought { text } => Self::estimate_text(text),
            Part::FunctionCall { name, args, .. } => {
                let args = serde_json::to_string(args).unwrap_or_default();
                Self::estimate_text(name) + Self::estimate_text(&args) + Self::FUNCTION_CALL_OVERHEAD
            }
            Part::FunctionResponse { name, response, .. } => {
                let response = serde_json::to_string(response).unwrap_or_default();
                Self::estimate_text(name)
                    + Self::estimate_text(&response)
                    + Self::FUNCTION_RESPONSE_OVERHEAD
            }
        }
    }

    #[must_use]
    pub fn estimate_history(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}
