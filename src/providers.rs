//! LLM provider adapters.
//!
//! [`Provider`] is the closed set of built-in adapters, chosen from a
//! [`ProviderConfig`] by [`Provider::from_config`]. Other backends only need
//! to implement [`LlmProvider`]; the rest of the crate works against the
//! trait.

pub mod gemini;
pub mod intent;
pub mod openai;
mod sse;

pub use gemini::GeminiProvider;
pub use intent::{FileCreationIntentExtractor, IntentExtractor, NoIntentExtractor};
pub use openai::OpenAiProvider;

use crate::llm::{
    BackendKind, Capabilities, GenerateRequest, GenerateResponse, LlmProvider,
    Message, ProviderConfig, ProviderError, StreamBox,
};
use async_trait::async_trait;

/// Built-in adapters.
#[derive(Clone)]
pub enum Provider {
    Gemini(GeminiProvider),
    OpenAi(OpenAiProvider),
}

impl Provider {
    /// Build the adapter named by `config.backend`.
    ///
    /// # Errors
    /// Returns a permanent error for an unrecognized backend id. No default
    /// backend is substituted.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let backend = BackendKind::from_id(&config.backend).ok_or_else(|| {
            ProviderError::permanent(format!("unknown backend '{}'", config.backend))
        })?;
        let credentials = config.credentials.clone();

        Ok(match backend {
            BackendKind::Gemini => {
                let provider = GeminiProvider::new(credentials);
                Self::Gemini(match &config.endpoint {
                    Some(endpoint) => provider.with_base_url(endpoint.clone()),
                    None => provider,
                })
            }
            BackendKind::OpenAi => Self::OpenAi(match &config.endpoint {
                Some(endpoint) => OpenAiProvider::compatible(endpoint.clone(), credentials),
                None => OpenAiProvider::new(credentials),
            }),
            BackendKind::OpenAiCompatible => {
                let endpoint = config.endpoint.clone().ok_or_else(|| {
                    ProviderError::permanent("openai-compatible backend requires an endpoint")
                })?;
                Self::OpenAi(OpenAiProvider::compatible(endpoint, credentials))
            }
            BackendKind::Ollama => Self::OpenAi(OpenAiProvider::ollama(config.endpoint.clone())),
        })
    }

    fn inner(&self) -> &dyn LlmProvider {
        match self {
            Self::Gemini(p) => p,
            Self::OpenAi(p) => p,
        }
    }
}

#[async_trait]
impl LlmProvider for Provider {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.inner().generate(request).await
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<StreamBox, ProviderError> {
        self.inner().generate_stream(request).await
    }

    async fn count_tokens(&self, model: &str, contents: &[Message]) -> Result<u32, ProviderError> {
        self.inner().count_tokens(model, contents).await
    }

    fn capabilities(&self, model: &str) -> Capabilities {
        self.inner().capabilities(model)
    }

    fn backend(&self) -> BackendKind {
        self.inner().backend()
    }
}
