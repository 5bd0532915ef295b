//! Configuration for chat compression.

use serde::{Deserialize, Serialize};

pub const DEFAULT_COMPRESSION_THRESHOLD: f64 = 0.95;

pub const DEFAULT_SUMMARY_PROMPT: &str = "Summarize our conversation up to this point. \
The summary should be a concise yet comprehensive overview of all key topics, questions, \
answers, and important details discussed. This summary will replace the current chat \
history to conserve tokens, so it must capture everything essential to understand the \
context and continue the conversation effectively as if no information was lost.";

/// Controls when and how history is summarized.
///
/// # Example
///
/// ```
/// use agent_core::context::CompressionConfig;
///
/// let config = CompressionConfig::default()
///     .with_threshold(0.8)
///     .with_token_limit(32_000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Fraction of the context limit at which compression triggers.
    /// Default: 0.95
    pub threshold: f64,

    /// User message sent to request the summary.
    pub summary_prompt: String,

    /// Context limit to use instead of the built-in per-model table.
    pub token_limit: Option<u32>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_COMPRESSION_THRESHOLD,
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_owned(),
            token_limit: None,
        }
    }
}

impl CompressionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_summary_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summary_prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn with_token_limit(mut self, limit: u32) -> Self {
        self.token_limit = Some(limit);
        self
    }
}
