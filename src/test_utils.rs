use crate::context::TokenEstimator;
use crate::events::StreamEvent;
use crate::hooks::{ConfirmationOutcome, SchedulerHooks};
use crate::llm::{
    BackendKind, Capabilities, GenerateRequest, GenerateResponse, LlmProvider, Message, Part,
    ProviderError, Role, StreamBox,
};
use crate::scheduler::{CompletedBatch, ToolCallRecord};
use crate::tools::{ConfirmationDetails, ConfirmationKind, Tool};
use crate::types::ToolResult;
use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ===================
// Mock LLM Provider
// ===================

pub fn text_chunk(text: &str) -> GenerateResponse {
    GenerateResponse {
        parts: vec![Part::text(text)],
        ..GenerateResponse::default()
    }
}

pub fn call_chunk(id: Option<&str>, name: &str, args: Value) -> GenerateResponse {
    GenerateResponse {
        parts: vec![Part::FunctionCall {
            id: id.map(str::to_owned),
            name: name.to_owned(),
            args,
        }],
        ..GenerateResponse::default()
    }
}

/// What the mock does for one call.
pub enum MockReply {
    Chunks(Vec<Result<GenerateResponse, ProviderError>>),
    Reject(ProviderError),
    /// Pause before each chunk
    Slow {
        chunks: Vec<GenerateResponse>,
        delay: Duration,
    },
}

impl MockReply {
    pub fn chunks(chunks: Vec<GenerateResponse>) -> Self {
        Self::Chunks(chunks.into_iter().map(Ok).collect())
    }

    pub fn text(text: &str) -> Self {
        Self::chunks(vec![text_chunk(text)])
    }

    pub fn call(id: &str, name: &str, args: Value) -> Self {
        Self::chunks(vec![call_chunk(Some(id), name, args)])
    }
}

/// Scripted provider. Replies are consumed in order; once they run out the
/// provider echoes the last user text.
pub struct MockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<GenerateRequest>>,
    token_counts: Mutex<VecDeque<u32>>,
    capabilities: Capabilities,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            token_counts: Mutex::new(VecDeque::new()),
            capabilities: Capabilities {
                supports_function_calling: true,
                supports_vision: false,
                max_context_length: None,
            },
        }
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push_reply(reply);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        locked(&self.replies).push_back(reply);
    }

    /// Values returned by `count_tokens`, in order, before falling back to
    /// the estimator.
    pub fn with_token_counts(self, counts: Vec<u32>) -> Self {
        locked(&self.token_counts).extend(counts);
        self
    }

    pub const fn without_function_calling(mut self) -> Self {
        self.capabilities.supports_function_calling = false;
        self
    }

    pub const fn with_context_length(mut self, tokens: u32) -> Self {
        self.capabilities.max_context_length = Some(tokens);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        locked(&self.requests).clone()
    }

    fn next_reply(&self, request: &GenerateRequest) -> MockReply {
        locked(&self.requests).push(request.clone());
        locked(&self.replies).pop_front().unwrap_or_else(|| {
            let last_user = request
                .contents
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(Message::text)
                .unwrap_or_default();
            MockReply::text(&format!("echo: {last_user}"))
        })
    }
}

fn merge(chunks: Vec<GenerateResponse>) -> GenerateResponse {
    chunks
        .into_iter()
        .fold(GenerateResponse::default(), |mut acc, chunk| {
            acc.parts.extend(chunk.parts);
            acc.finish_reason = chunk.finish_reason.or(acc.finish_reason);
            acc.usage = chunk.usage.or(acc.usage);
            acc
        })
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        match self.next_reply(request) {
            MockReply::Chunks(chunks) => Ok(merge(chunks.into_iter().collect::<Result<_, _>>()?)),
            MockReply::Reject(e) => Err(e),
            MockReply::Slow { chunks, delay } => {
                for _ in &chunks {
                    tokio::time::sleep(delay).await;
                }
                Ok(merge(chunks))
            }
        }
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<StreamBox, ProviderError> {
        match self.next_reply(request) {
            MockReply::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(chunks))),
            MockReply::Reject(e) => Err(e),
            MockReply::Slow { chunks, delay } => Ok(Box::pin(async_stream::stream! {
                for chunk in chunks {
                    tokio::time::sleep(delay).await;
                    yield Ok(chunk);
                }
            })),
        }
    }

    async fn count_tokens(&self, _model: &str, contents: &[Message]) -> Result<u32, ProviderError> {
        let scripted = locked(&self.token_counts).pop_front();
        Ok(scripted.unwrap_or_else(|| {
            u32::try_from(TokenEstimator::estimate_history(contents)).unwrap_or(u32::MAX)
        }))
    }

    fn capabilities(&self, _model: &str) -> Capabilities {
        self.capabilities
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Gemini
    }
}

// ===================
// Echo Tool
// ===================

/// Tool that answers with its own name and arguments.
pub struct EchoTool {
    name: String,
    confirm: bool,
    restorable: bool,
    fail: bool,
    delay: Option<Duration>,
    executions: AtomicUsize,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            confirm: false,
            restorable: false,
            fail: false,
            delay: None,
            executions: AtomicUsize::new(0),
        }
    }

    pub const fn confirming(mut self) -> Self {
        self.confirm = true;
        self
    }

    pub const fn restorable(mut self) -> Self {
        self.restorable = true;
        self
    }

    pub const fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes its arguments"
    }

    fn parameter_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn is_restorable(&self) -> bool {
        self.restorable
    }

    fn validate_args(&self, args: &Value) -> Result<(), String> {
        if args.is_object() {
            Ok(())
        } else {
            Err("arguments must be an object".to_owned())
        }
    }

    async fn should_confirm_execute(
        &self,
        args: &Value,
        _cancel: &CancellationToken,
    ) -> Option<ConfirmationDetails> {
        self.confirm.then(|| {
            ConfirmationDetails::new(
                ConfirmationKind::Edit,
                format!("Confirm {}", self.name),
                args.to_string(),
            )
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<ToolResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            bail!("{} failed", self.name);
        }
        Ok(ToolResult::new(format!("{} {args}", self.name)))
    }
}

// ===================
// Recording Hooks
// ===================

/// Hooks that answer confirmations from a script and record what they saw.
#[derive(Default)]
pub struct RecordingHooks {
    outcomes: Mutex<VecDeque<ConfirmationOutcome>>,
    never_answer: bool,
    confirmations: Mutex<Vec<ToolCallRecord>>,
    updates: Mutex<Vec<Vec<ToolCallRecord>>>,
    batches: Mutex<Vec<CompletedBatch>>,
}

impl RecordingHooks {
    /// Answers in order, then `ProceedOnce`.
    pub fn with_outcomes(outcomes: Vec<ConfirmationOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    /// Never answers a confirmation request.
    pub fn unresponsive() -> Self {
        Self {
            never_answer: true,
            ..Self::default()
        }
    }

    pub fn confirmations(&self) -> Vec<ToolCallRecord> {
        locked(&self.confirmations).clone()
    }

    pub fn updates(&self) -> Vec<Vec<ToolCallRecord>> {
        locked(&self.updates).clone()
    }

    pub fn batches(&self) -> Vec<CompletedBatch> {
        locked(&self.batches).clone()
    }
}

#[async_trait]
impl SchedulerHooks for RecordingHooks {
    async fn request_confirmation(
        &self,
        record: &ToolCallRecord,
        _details: &ConfirmationDetails,
    ) -> ConfirmationOutcome {
        locked(&self.confirmations).push(record.clone());
        if self.never_answer {
            std::future::pending::<()>().await;
        }
        locked(&self.outcomes)
            .pop_front()
            .unwrap_or(ConfirmationOutcome::ProceedOnce)
    }

    async fn on_update(&self, records: &[ToolCallRecord]) {
        locked(&self.updates).push(records.to_vec());
    }

    async fn on_batch_complete(&self, batch: &CompletedBatch) {
        locked(&self.batches).push(batch.clone());
    }
}

// ===================
// Streams
// ===================

/// Drain an event stream, stopping at the first rethrown error.
pub async fn collect_events<S>(stream: S) -> Result<Vec<StreamEvent>, ProviderError>
where
    S: Stream<Item = Result<StreamEvent, ProviderError>>,
{
    stream.try_collect().await
}
