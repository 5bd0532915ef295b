use crate::events::ToolCallRequestInfo;
use crate::llm::Part;
use crate::tools::ConfirmationDetails;
use crate::types::ToolResult;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub const CANCELLED_BY_OPERATOR: &str =
    "[Operation Cancelled] Reason: User did not allow tool call";
pub const CANCELLED_BY_TOKEN: &str = "[Operation Cancelled] Reason: User cancelled tool execution.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("illegal transition for call {call_id}: {from} -> {to}")]
    IllegalTransition {
        call_id: String,
        from: &'static str,
        to: &'static str,
    },
}

/// Lifecycle phase of one tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallState {
    Validating,
    AwaitingApproval { details: ConfirmationDetails },
    Executing,
    Success { result: ToolResult, duration_ms: u64 },
    Error { message: String },
    Cancelled { reason: String },
}

impl ToolCallState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::AwaitingApproval { .. } => "awaiting_approval",
            Self::Executing => "executing",
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Position in the forward order of one attempt.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Validating => 0,
            Self::AwaitingApproval { .. } => 1,
            Self::Executing => 2,
            Self::Success { .. } | Self::Error { .. } | Self::Cancelled { .. } => 3,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    fn allows(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Validating, Self::AwaitingApproval { .. } | Self::Executing)
            | (Self::AwaitingApproval { .. }, Self::Executing | Self::Validating)
            | (Self::Executing, Self::Success { .. }) => true,
            (from, Self::Error { .. } | Self::Cancelled { .. }) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// A tool call request together with its current state.
///
/// States only move forward within an attempt. Editing the arguments while
/// awaiting approval starts a new attempt back in `Validating`, so the pair
/// `(attempt, rank)` strictly increases over the record's life.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub request: ToolCallRequestInfo,
    pub state: ToolCallState,
    pub attempt: u32,
}

impl ToolCallRecord {
    #[must_use]
    pub const fn new(request: ToolCallRequestInfo) -> Self {
        Self {
            request,
            state: ToolCallState::Validating,
            attempt: 0,
        }
    }

    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.request.name
    }

    #[must_use]
    pub const fn position(&self) -> (u32, u8) {
        (self.attempt, self.state.rank())
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// Returns [`SchedulerError::IllegalTransition`] for a backward move or
    /// any move out of a terminal state. The record is unchanged then.
    pub fn transition(&mut self, next: ToolCallState) -> Result<(), SchedulerError> {
        if !self.state.allows(&next) {
            return Err(SchedulerError::IllegalTransition {
                call_id: self.request.call_id.clone(),
                from: self.state.name(),
                to: next.name(),
            });
        }
        if matches!(next, ToolCallState::Validating) {
            self.attempt += 1;
        }
        log::debug!(
            "Tool call transition call_id={} tool={} {} -> {} attempt={}",
            self.request.call_id,
            self.request.name,
            self.state.name(),
            next.name(),
            self.attempt
        );
        self.state = next;
        Ok(())
    }

    /// Payload reported back to the model for a terminal record.
    #[must_use]
    pub fn response_payload(&self) -> Value {
        match &self.state {
            ToolCallState::Success { result, .. } => json!({ "output": result.llm_content }),
            ToolCallState::Error { message } => json!({ "error": message }),
            ToolCallState::Cancelled { reason } => json!({ "error": reason }),
            other => json!({ "error": format!("Tool call did not finish (state: {})", other.name()) }),
        }
    }

    #[must_use]
    pub fn response_part(&self) -> Part {
        Part::FunctionResponse {
            id: self.request.call_id.clone(),
            name: self.request.name.clone(),
            response: self.response_payload(),
        }
    }
}
