//! Provider contract shared by every backend adapter.

mod error;
pub mod models;
pub mod streaming;
pub mod types;

pub use error::ProviderError;
pub(crate) use error::parse_retry_after;
pub use streaming::{ChunkSemantics, DeltaNormalizer, StreamAccumulator, StreamBox};
pub use types::*;

use crate::context::TokenEstimator;
use async_trait::async_trait;

/// Uniform call interface to one language-model backend.
///
/// Adapters translate [`GenerateRequest`]s into their wire schema and map
/// responses and failures back. Streams returned by
/// [`generate_stream`](Self::generate_stream) are finite, not restartable,
/// and carry incremental text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Open a streaming exchange.
    ///
    /// The outer result resolves once the backend has accepted the call;
    /// failures after that arrive as items of the stream.
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<StreamBox, ProviderError>;

    /// Count prompt tokens for `contents`.
    ///
    /// The default is a character-based estimate for backends without a
    /// counting endpoint.
    async fn count_tokens(&self, model: &str, contents: &[Message]) -> Result<u32, ProviderError> {
        let _ = model;
        Ok(u32::try_from(TokenEstimator::estimate_history(contents)).unwrap_or(u32::MAX))
    }

    fn capabilities(&self, model: &str) -> Capabilities;

    fn backend(&self) -> BackendKind;
}
