//! Scheduler hooks for operator interaction.
//!
//! Hooks let the embedding application take part in tool scheduling:
//!
//! - [`SchedulerHooks::request_confirmation`] - Approve, edit or deny a call
//! - [`SchedulerHooks::on_update`] - Observe every state change in a batch
//! - [`SchedulerHooks::on_batch_complete`] - React once a batch resolves
//!
//! # Built-in Implementations
//!
//! - [`DenyAllHooks`] - Deny every call that needs confirmation (default)
//! - [`AutoApproveHooks`] - Approve everything without asking
//! - [`LoggingHooks`] - Debug logging around another hooks implementation

use crate::scheduler::{CompletedBatch, ToolCallRecord};
use crate::tools::ConfirmationDetails;
use async_trait::async_trait;
use serde_json::Value;

/// Operator answer to a confirmation request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    /// Run this call
    ProceedOnce,
    /// Run this call and stop asking about this tool
    ProceedAlways,
    /// Re-validate the call with new arguments
    ModifyWithArgs(Value),
    /// Do not run the call
    Cancel,
}

/// Lifecycle hooks for the tool scheduler.
/// Implement this trait to put an operator in the loop.
#[async_trait]
pub trait SchedulerHooks: Send + Sync {
    /// Called when a call needs approval. May wait indefinitely; the
    /// scheduler abandons the wait if the turn is cancelled.
    async fn request_confirmation(
        &self,
        record: &ToolCallRecord,
        details: &ConfirmationDetails,
    ) -> ConfirmationOutcome {
        let _ = (record, details);
        ConfirmationOutcome::Cancel
    }

    /// Called after any record in the batch changes state.
    async fn on_update(&self, _records: &[ToolCallRecord]) {}

    /// Called once every record in the batch is terminal.
    async fn on_batch_complete(&self, _batch: &CompletedBatch) {}
}

/// Denies anything that asks for confirmation
pub struct DenyAllHooks;

#[async_trait]
impl SchedulerHooks for DenyAllHooks {}

/// Approves every call
pub struct AutoApproveHooks;

#[async_trait]
impl SchedulerHooks for AutoApproveHooks {
    async fn request_confirmation(
        &self,
        _record: &ToolCallRecord,
        _details: &ConfirmationDetails,
    ) -> ConfirmationOutcome {
        ConfirmationOutcome::ProceedOnce
    }
}

/// Hooks that log everything, then defer to `inner`
pub struct LoggingHooks<H = DenyAllHooks> {
    inner: H,
}

impl<H: SchedulerHooks> LoggingHooks<H> {
    #[must_use]
    pub const fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl Default for LoggingHooks {
    fn default() -> Self {
        Self::new(DenyAllHooks)
    }
}

#[async_trait]
impl<H: SchedulerHooks> SchedulerHooks for LoggingHooks<H> {
    async fn request_confirmation(
        &self,
        record: &ToolCallRecord,
        details: &ConfirmationDetails,
    ) -> ConfirmationOutcome {
        log::debug!(
            "Confirmation requested call_id={} tool={} kind={:?} title={}",
            record.call_id(),
            record.name(),
            details.kind,
            details.title
        );
        let outcome = self.inner.request_confirmation(record, details).await;
        log::debug!("Confirmation resolved call_id={} outcome={outcome:?}", record.call_id());
        outcome
    }

    async fn on_update(&self, records: &[ToolCallRecord]) {
        for record in records {
            log::debug!(
                "Tool call call_id={} tool={} state={} attempt={}",
                record.call_id(),
                record.name(),
                record.state.name(),
                record.attempt
            );
        }
        self.inner.on_update(records).await;
    }

    async fn on_batch_complete(&self, batch: &CompletedBatch) {
        log::debug!(
            "Tool batch complete calls={} all_cancelled={}",
            batch.records.len(),
            batch.all_cancelled()
        );
        self.inner.on_batch_complete(batch).await;
    }
}
