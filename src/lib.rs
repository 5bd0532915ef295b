//! Agent Core - orchestration for LLM agents.
//!
//! This crate drives the conversational loop between a language-model
//! backend and a set of executable tools:
//! - Provider adapters that normalize streaming wire formats
//! - A chat session that keeps history ordered and valid
//! - A turn engine that turns raw chunks into [`StreamEvent`]s
//! - A tool scheduler with operator approval and cancellation
//! - History compression and retry with model fallback
//!
//! # Example
//!
//! ```ignore
//! use agent_core::{AgentClient, AutoApproveHooks, ToolRegistry};
//! use agent_core::llm::{Credentials, Part};
//! use agent_core::providers::GeminiProvider;
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! let client = AgentClient::builder()
//!     .provider(GeminiProvider::new(Credentials::api_key(api_key)))
//!     .tools(ToolRegistry::new())
//!     .hooks(AutoApproveHooks)
//!     .build();
//!
//! let mut events = Box::pin(
//!     client.send_message_stream(vec![Part::text("Hello!")], CancellationToken::new()),
//! );
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! ```

#![forbid(unsafe_code)]

pub mod chat;
pub mod checkpoint;
pub mod client;
pub mod context;
pub mod diagnostics;
pub mod events;
pub mod hooks;
pub mod llm;
pub mod providers;
pub mod retry;
pub mod scheduler;
pub mod tools;
pub mod turn;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use chat::{ChatSession, HistoryLock};
pub use client::{AgentClient, AgentClientBuilder};
pub use context::{ChatCompressionInfo, ChatCompressor, CompressionConfig};
pub use diagnostics::{ErrorReport, ErrorReporter, JsonFileReporter, LogReporter};
pub use events::{StreamEvent, ToolCallOrigin, ToolCallRequestInfo};
pub use hooks::{
    AutoApproveHooks, ConfirmationOutcome, DenyAllHooks, LoggingHooks, SchedulerHooks,
};
pub use llm::{LlmProvider, ProviderError};
pub use retry::{RetryConfig, RetryController};
pub use scheduler::{CompletedBatch, ToolCallRecord, ToolCallState, ToolScheduler};
pub use tools::{ConfirmationDetails, ConfirmationKind, Tool, ToolRegistry};
pub use turn::Turn;
pub use types::{ClientConfig, ToolResult};
