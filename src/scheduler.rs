//! Tool call scheduling.
//!
//! [`ToolScheduler::schedule`] takes the tool call requests of one turn and
//! drives each through its lifecycle:
//!
//! ```text
//! Validating ─┬─> AwaitingApproval ─┬─> Executing ─┬─> Success
//!             │          │          │              ├─> Error
//!             │          └─(edit)─> Validating     └─> Cancelled
//!             └──────────────────────┘
//! ```
//!
//! Calls in a batch run concurrently and fail independently. The batch is
//! returned only once every record is terminal, so the model never sees a
//! partial set of responses.

mod state;

#[cfg(test)]
mod tests;

pub use state::{
    CANCELLED_BY_OPERATOR, CANCELLED_BY_TOKEN, SchedulerError, ToolCallRecord, ToolCallState,
};

use crate::checkpoint::Checkpointer;
use crate::events::ToolCallRequestInfo;
use crate::hooks::{ConfirmationOutcome, SchedulerHooks};
use crate::llm::{Message, Part};
use crate::tools::{Tool, ToolRegistry};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// All records of a dispatched batch, every one of them terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedBatch {
    pub records: Vec<ToolCallRecord>,
}

impl CompletedBatch {
    /// True when the batch is non-empty and no call got past cancellation.
    #[must_use]
    pub fn all_cancelled(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.state.is_cancelled())
    }

    /// One function response per record, in request order.
    #[must_use]
    pub fn response_parts(&self) -> Vec<Part> {
        self.records.iter().map(ToolCallRecord::response_part).collect()
    }

    /// The user message that answers the model's function calls.
    #[must_use]
    pub fn response_message(&self) -> Message {
        Message::user_parts(self.response_parts())
    }
}

/// Shared view of a batch in flight, reported to hooks on every change.
struct BatchState {
    records: Mutex<Vec<ToolCallRecord>>,
}

impl BatchState {
    fn store(&self, index: usize, record: &ToolCallRecord) -> Vec<ToolCallRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = records.get_mut(index) {
            slot.clone_from(record);
        }
        records.clone()
    }

    fn into_records(self) -> Vec<ToolCallRecord> {
        self.records
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    hooks: Arc<dyn SchedulerHooks>,
    checkpointer: Option<Checkpointer>,
    always_allowed: Mutex<HashSet<String>>,
}

impl ToolScheduler {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, hooks: Arc<dyn SchedulerHooks>) -> Self {
        Self {
            registry,
            hooks,
            checkpointer: None,
            always_allowed: Mutex::new(HashSet::new()),
        }
    }

    /// Checkpoint restorable tools before they run.
    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run `requests` to completion.
    ///
    /// `history` is the session history at dispatch time; it is recorded in
    /// checkpoints. Tripping `cancel` cancels every call that has not
    /// finished yet.
    pub async fn schedule(
        &self,
        requests: Vec<ToolCallRequestInfo>,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> CompletedBatch {
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(requests.len());
        let mut duplicates = Vec::with_capacity(requests.len());
        for request in requests {
            duplicates.push(!seen.insert(request.call_id.clone()));
            records.push(ToolCallRecord::new(request));
        }

        let batch = BatchState {
            records: Mutex::new(records.clone()),
        };
        self.hooks.on_update(&records).await;

        let runs = records
            .into_iter()
            .zip(duplicates)
            .enumerate()
            .map(|(index, (record, duplicate))| {
                self.run_call(&batch, index, record, duplicate, history, cancel)
            });
        futures::future::join_all(runs).await;

        let completed = CompletedBatch {
            records: batch.into_records(),
        };
        self.hooks.on_batch_complete(&completed).await;
        completed
    }

    async fn update(&self, batch: &BatchState, index: usize, record: &ToolCallRecord) {
        let snapshot = batch.store(index, record);
        self.hooks.on_update(&snapshot).await;
    }

    /// Apply `next`, publish the change, and report whether it was legal.
    async fn advance(
        &self,
        batch: &BatchState,
        index: usize,
        record: &mut ToolCallRecord,
        next: ToolCallState,
    ) -> bool {
        match record.transition(next) {
            Ok(()) => {
                self.update(batch, index, record).await;
                true
            }
            Err(e) => {
                log::warn!("{e}");
                false
            }
        }
    }

    async fn fail(
        &self,
        batch: &BatchState,
        index: usize,
        record: &mut ToolCallRecord,
        message: String,
    ) {
        log::warn!(
            "Tool call failed call_id={} tool={} error={message}",
            record.call_id(),
            record.name()
        );
        self.advance(batch, index, record, ToolCallState::Error { message })
            .await;
    }

    async fn mark_cancelled(
        &self,
        batch: &BatchState,
        index: usize,
        record: &mut ToolCallRecord,
        reason: &str,
    ) {
        self.advance(
            batch,
            index,
            record,
            ToolCallState::Cancelled {
                reason: reason.to_owned(),
            },
        )
        .await;
    }

    async fn run_call(
        &self,
        batch: &BatchState,
        index: usize,
        mut record: ToolCallRecord,
        duplicate: bool,
        history: &[Message],
        cancel: &CancellationToken,
    ) {
        if duplicate {
            let message = format!("Duplicate call id \"{}\" in batch", record.call_id());
            self.fail(batch, index, &mut record, message).await;
            return;
        }

        let Some(tool) = self.registry.get(record.name()).cloned() else {
            let message = format!("Tool \"{}\" not found in registry.", record.name());
            self.fail(batch, index, &mut record, message).await;
            return;
        };

        if !self
            .await_approval(batch, index, &mut record, tool.as_ref(), cancel)
            .await
        {
            return;
        }

        if tool.is_restorable()
            && let Some(checkpointer) = &self.checkpointer
        {
            let paths = tool.affected_paths(&record.request.args);
            if let Err(e) = checkpointer.checkpoint(&record, &paths, history).await {
                log::warn!(
                    "Failed to checkpoint before tool call call_id={} tool={} error={e}",
                    record.call_id(),
                    record.name()
                );
            }
        }

        self.execute(batch, index, &mut record, tool.as_ref(), cancel)
            .await;
    }

    /// Validate and confirm until the record reaches `Executing`. Returns
    /// false if it ended up terminal instead.
    async fn await_approval(
        &self,
        batch: &BatchState,
        index: usize,
        record: &mut ToolCallRecord,
        tool: &dyn Tool,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            if cancel.is_cancelled() {
                self.mark_cancelled(batch, index, record, CANCELLED_BY_TOKEN).await;
                return false;
            }

            if let Err(message) = tool.validate_args(&record.request.args) {
                self.fail(batch, index, record, message).await;
                return false;
            }

            let always = self
                .always_allowed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(record.name());
            let details = if always {
                None
            } else {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        self.mark_cancelled(batch, index, record, CANCELLED_BY_TOKEN).await;
                        return false;
                    }
                    details = tool.should_confirm_execute(&record.request.args, cancel) => details,
                }
            };

            let Some(details) = details else {
                return self
                    .advance(batch, index, record, ToolCallState::Executing)
                    .await;
            };

            self.advance(
                batch,
                index,
                record,
                ToolCallState::AwaitingApproval {
                    details: details.clone(),
                },
            )
            .await;

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.mark_cancelled(batch, index, record, CANCELLED_BY_TOKEN).await;
                    return false;
                }
                outcome = self.hooks.request_confirmation(record, &details) => outcome,
            };

            match outcome {
                ConfirmationOutcome::ProceedOnce => {}
                ConfirmationOutcome::ProceedAlways => {
                    self.always_allowed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(record.name().to_owned());
                }
                ConfirmationOutcome::Cancel => {
                    self.mark_cancelled(batch, index, record, CANCELLED_BY_OPERATOR).await;
                    return false;
                }
                ConfirmationOutcome::ModifyWithArgs(args) => {
                    record.request.args = args;
                    self.advance(batch, index, record, ToolCallState::Validating)
                        .await;
                    continue;
                }
            }

            return self
                .advance(batch, index, record, ToolCallState::Executing)
                .await;
        }
    }

    async fn execute(
        &self,
        batch: &BatchState,
        index: usize,
        record: &mut ToolCallRecord,
        tool: &dyn Tool,
        cancel: &CancellationToken,
    ) {
        let started = Instant::now();
        let args = record.request.args.clone();

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = tool.execute(args, cancel.child_token()) => Some(result),
        };

        match result {
            // A result that lands after the token tripped is discarded
            None => self.mark_cancelled(batch, index, record, CANCELLED_BY_TOKEN).await,
            Some(_) if cancel.is_cancelled() => {
                self.mark_cancelled(batch, index, record, CANCELLED_BY_TOKEN).await;
            }
            Some(Ok(result)) => {
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                log::debug!(
                    "Tool call succeeded call_id={} tool={} duration_ms={duration_ms}",
                    record.call_id(),
                    record.name()
                );
                self.advance(
                    batch,
                    index,
                    record,
                    ToolCallState::Success {
                        result,
                        duration_ms,
                    },
                )
                .await;
            }
            Some(Err(e)) => self.fail(batch, index, record, format!("{e:#}")).await,
        }
    }
}
