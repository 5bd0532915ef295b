//! Events emitted while a turn runs.
//!
//! [`StreamEvent`] is the upward surface of the core: a UI layer consumes
//! these and nothing else. Events serialize as internally tagged JSON.
//!
//! # Event Flow
//!
//! A typical turn looks like:
//! 1. `ChatCompressed` - only if history was summarized first
//! 2. `Thought` / `Content` / `ToolCallRequest` - while the response streams
//! 3. `UsageMetadata` - once the stream has ended
//!
//! A cancelled turn ends with a single `UserCancelled`; a failed one with a
//! single `Error`.

use crate::context::ChatCompressionInfo;
use crate::llm::UsageMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who asked for a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallOrigin {
    ModelInitiated,
    ClientInitiated,
}

/// A tool call requested during a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequestInfo {
    pub call_id: String,
    pub name: String,
    pub args: Value,
    pub origin: ToolCallOrigin,
}

impl ToolCallRequestInfo {
    #[must_use]
    pub fn model(call_id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
            origin: ToolCallOrigin::ModelInitiated,
        }
    }

    #[must_use]
    pub fn client(call_id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
            origin: ToolCallOrigin::ClientInitiated,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Visible model text
    Content { text: String },

    /// Model reasoning, never part of the visible content
    Thought { subject: String, description: String },

    ToolCallRequest(ToolCallRequestInfo),

    /// Last usage sample of the turn and how long the turn took
    UsageMetadata {
        usage: Option<UsageMetadata>,
        duration_ms: u64,
    },

    /// History was summarized before the turn started
    ChatCompressed(ChatCompressionInfo),

    UserCancelled,

    Error {
        message: String,
        status: Option<u16>,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    #[must_use]
    pub fn thought(subject: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Thought {
            subject: subject.into(),
            description: description.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Error {
            message: message.into(),
            status,
        }
    }

    /// Whether this event ends the turn's event sequence.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::UserCancelled | Self::Error { .. })
    }
}
