//! Shared value types.
//!
//! - [`ToolResult`]: what a tool hands back after running
//! - [`ClientConfig`]: knobs for the request/turn/tool loop

use serde::{Deserialize, Serialize};

/// Result of a tool execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content fed back to the model as the function response
    pub llm_content: String,
    /// Optional rendering for the user; defaults to `llm_content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl ToolResult {
    #[must_use]
    pub fn new(llm_content: impl Into<String>) -> Self {
        Self {
            llm_content: llm_content.into(),
            display: None,
        }
    }

    #[must_use]
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    #[must_use]
    pub fn display_text(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.llm_content)
    }
}

/// Configuration for [`crate::AgentClient`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upper bound on turns started by one user message, continuations
    /// included
    pub max_session_turns: usize,
    /// Snapshot files before restorable tools run
    pub checkpointing: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_session_turns: 100,
            checkpointing: false,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn with_max_session_turns(mut self, turns: usize) -> Self {
        self.max_session_turns = turns;
        self
    }

    #[must_use]
    pub const fn with_checkpointing(mut self, enabled: bool) -> Self {
        self.checkpointing = enabled;
        self
    }
}
