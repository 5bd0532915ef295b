//! History summarization.

use crate::chat::ChatSession;
use crate::llm::{Message, Part, ProviderError, models};
use serde::{Deserialize, Serialize};

use super::config::CompressionConfig;

/// Token counts around one compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompressionInfo {
    pub original_token_count: u32,
    pub new_token_count: u32,
}

/// Replaces a session's history with a model-written summary once it grows
/// close to the model's context limit.
#[derive(Debug, Clone, Default)]
pub struct ChatCompressor {
    config: CompressionConfig,
}

impl ChatCompressor {
    #[must_use]
    pub const fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Summarize `session` if its curated history is at or above the
    /// threshold, or unconditionally when `force` is set.
    ///
    /// The session is held for the whole summarize-and-replace, so sends
    /// and history writes issued meanwhile land after the new history.
    ///
    /// Returns `None` when nothing was done: empty history, usage below the
    /// threshold, an unknown context limit, or an empty summary. On success
    /// the history holds exactly the summary request and the summary.
    ///
    /// # Errors
    /// Propagates token counting and summary request failures. The history
    /// is left untouched in that case.
    pub async fn compress(
        &self,
        session: &ChatSession,
        force: bool,
    ) -> Result<Option<ChatCompressionInfo>, ProviderError> {
        let mut locked = session.lock().await;
        let curated = locked.history(true);
        if curated.is_empty() {
            return Ok(None);
        }

        let model = session.model();
        let provider = session.provider();
        let original_token_count = provider.count_tokens(&model, &curated).await?;

        if !force {
            let Some(limit) = self.context_limit(session, &model) else {
                log::debug!("No known context limit, skipping compression model={model}");
                return Ok(None);
            };
            if f64::from(original_token_count) < self.config.threshold * f64::from(limit) {
                return Ok(None);
            }
        }

        log::info!(
            "Compressing chat history model={model} tokens={original_token_count} force={force}"
        );

        let before = locked.history(false);
        let response = locked
            .send(vec![Part::text(self.config.summary_prompt.as_str())], None)
            .await?;
        let summary = response.text();
        if summary.trim().is_empty() {
            log::warn!("Summary response was empty, history left unchanged model={model}");
            locked.set_history(before);
            return Ok(None);
        }

        let new_history = vec![
            Message::user(self.config.summary_prompt.as_str()),
            Message::model(summary),
        ];
        let new_token_count = match provider.count_tokens(&model, &new_history).await {
            Ok(count) => count,
            Err(e) => {
                locked.set_history(before);
                return Err(e);
            }
        };
        locked.set_history(new_history);

        Ok(Some(ChatCompressionInfo {
            original_token_count,
            new_token_count,
        }))
    }

    /// Configured limit, then the backend's advertised context length, then
    /// the static model table.
    fn context_limit(&self, session: &ChatSession, model: &str) -> Option<u32> {
        self.config
            .token_limit
            .or_else(|| session.provider().capabilities(model).max_context_length)
            .or_else(|| models::token_limit(model))
    }
}
