//! The request → turn → tools → continuation loop.
//!
//! [`AgentClient`] owns one [`ChatSession`] and one [`ToolScheduler`]. For
//! each user message it:
//!
//! 1. Compresses history if it is close to the model's context limit
//! 2. Runs a [`Turn`] and forwards its events
//! 3. Schedules the tool calls the turn requested
//! 4. Sends the batch responses as the next turn's input
//!
//! The loop stops when a turn requests no tools, when a turn ends in
//! `Error` or `UserCancelled`, when every call of a batch was cancelled, or
//! after [`ClientConfig::max_session_turns`] turns.
//!
//! # Example
//!
//! ```ignore
//! let client = AgentClient::builder()
//!     .provider(GeminiProvider::new(Credentials::api_key(key)))
//!     .tools(registry)
//!     .hooks(AutoApproveHooks)
//!     .build();
//!
//! let events = client.send_message_stream(vec![Part::text("list files")], cancel);
//! ```

#[cfg(test)]
mod tests;

use crate::chat::ChatSession;
use crate::checkpoint::{
    Checkpoint, CheckpointError, CheckpointJournal, Checkpointer, SnapshotStore,
    restore_checkpoint,
};
use crate::context::{ChatCompressionInfo, ChatCompressor, CompressionConfig};
use crate::diagnostics::{ErrorReporter, LogReporter};
use crate::events::{StreamEvent, ToolCallRequestInfo};
use crate::hooks::{LoggingHooks, SchedulerHooks};
use crate::llm::{CredentialKind, GenerationConfig, LlmProvider, Message, Part, ProviderError, models};
use crate::providers::intent::{IntentExtractor, NoIntentExtractor};
use crate::retry::{FallbackHandler, ModelSelection, RetryConfig, RetryController};
use crate::scheduler::{CompletedBatch, ToolScheduler};
use crate::tools::ToolRegistry;
use crate::turn::{Turn, synthesize_call_id};
use crate::types::ClientConfig;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AgentClient {
    session: ChatSession,
    scheduler: ToolScheduler,
    compressor: ChatCompressor,
    reporter: Arc<dyn ErrorReporter>,
    intents: Arc<dyn IntentExtractor>,
    checkpoints: Option<Checkpointer>,
    config: ClientConfig,
}

impl AgentClient {
    #[must_use]
    pub fn builder() -> AgentClientBuilder {
        AgentClientBuilder::new()
    }

    #[must_use]
    pub const fn session(&self) -> &ChatSession {
        &self.session
    }

    #[must_use]
    pub const fn scheduler(&self) -> &ToolScheduler {
        &self.scheduler
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The model used for the next request.
    #[must_use]
    pub fn model(&self) -> String {
        self.session.model()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.session.model_selection().set(model);
    }

    #[must_use]
    pub fn history(&self, curated: bool) -> Vec<Message> {
        self.session.get_history(curated)
    }

    pub async fn reset_chat(&self) {
        self.session.clear_history().await;
    }

    /// Summarize history now, regardless of how full the context is when
    /// `force` is set.
    ///
    /// # Errors
    /// Propagates failures of the summary exchange or of token counting.
    pub async fn try_compress(
        &self,
        force: bool,
    ) -> Result<Option<ChatCompressionInfo>, ProviderError> {
        self.compressor.compress(&self.session, force).await
    }

    /// Send a user message and stream events until the exchange settles.
    ///
    /// Authentication failures are yielded as `Err` and end the stream.
    pub fn send_message_stream(
        &self,
        parts: Vec<Part>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<StreamEvent, ProviderError>> + Send + '_ {
        async_stream::stream! {
            let max_turns = self.config.max_session_turns;
            let mut input = parts;
            let mut turns = 0;

            loop {
                if turns >= max_turns {
                    log::warn!("Max session turns reached max={max_turns}");
                    yield Ok(StreamEvent::error(
                        format!("Maximum session turns ({max_turns}) reached"),
                        None,
                    ));
                    return;
                }
                turns += 1;

                match self.compressor.compress(&self.session, false).await {
                    Ok(Some(info)) => yield Ok(StreamEvent::ChatCompressed(info)),
                    Ok(None) => {}
                    Err(e) if e.is_authentication() => {
                        yield Err(e);
                        return;
                    }
                    Err(e) => log::warn!("History compression failed, sending as is error={e}"),
                }

                let mut turn = Turn::new(&self.session)
                    .with_reporter(Arc::clone(&self.reporter))
                    .with_intent_extractor(Arc::clone(&self.intents));
                let mut ended = false;
                {
                    let mut events = Box::pin(turn.run(input, cancel.clone()));
                    while let Some(event) = events.next().await {
                        match event {
                            Ok(event) => {
                                ended |= event.is_terminal();
                                yield Ok(event);
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                }
                if ended {
                    return;
                }

                let requests = turn.take_pending_tool_calls();
                if requests.is_empty() {
                    return;
                }
                log::debug!("Dispatching tool calls turn={turns} calls={}", requests.len());

                let history = self.session.get_history(false);
                let batch = self.scheduler.schedule(requests, &history, &cancel).await;

                if cancel.is_cancelled() {
                    self.session.add_history(batch.response_message()).await;
                    yield Ok(StreamEvent::UserCancelled);
                    return;
                }
                if batch.all_cancelled() {
                    log::debug!("All tool calls cancelled, not continuing turn={turns}");
                    self.session.add_history(batch.response_message()).await;
                    return;
                }
                input = batch.response_parts();
            }
        }
    }

    /// Run a tool on the client's own behalf.
    ///
    /// The call goes through the same approval and checkpoint rules as a
    /// model call, but its result is not sent to the model.
    pub async fn run_client_tool(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> CompletedBatch {
        let request = ToolCallRequestInfo::client(synthesize_call_id(name), name, args);
        let history = self.session.get_history(false);
        self.scheduler.schedule(vec![request], &history, cancel).await
    }

    /// Checkpoint names, oldest first. Empty when checkpointing is off.
    ///
    /// # Errors
    /// Fails if the journal directory cannot be read.
    pub async fn list_checkpoints(&self) -> Result<Vec<String>, CheckpointError> {
        match &self.checkpoints {
            Some(checkpointer) => checkpointer.journal().list().await,
            None => Ok(Vec::new()),
        }
    }

    /// Roll files and history back to the checkpoint `name`.
    ///
    /// # Errors
    /// Returns [`CheckpointError::NotFound`] when checkpointing is off or
    /// the name is unknown, and propagates restore failures.
    pub async fn restore_checkpoint(&self, name: &str) -> Result<Checkpoint, CheckpointError> {
        let Some(checkpointer) = &self.checkpoints else {
            return Err(CheckpointError::NotFound(name.to_owned()));
        };
        restore_checkpoint(
            checkpointer.journal(),
            checkpointer.store().as_ref(),
            &self.session,
            name,
        )
        .await
    }
}

/// No provider set yet.
pub struct NoProvider;

/// Builder for [`AgentClient`]. A provider must be set before `build`.
pub struct AgentClientBuilder<P = NoProvider> {
    provider: P,
    model: Option<String>,
    tools: ToolRegistry,
    hooks: Arc<dyn SchedulerHooks>,
    reporter: Arc<dyn ErrorReporter>,
    intents: Arc<dyn IntentExtractor>,
    retry: RetryConfig,
    credential_kind: CredentialKind,
    fallback: Option<Arc<dyn FallbackHandler>>,
    fallback_model: Option<String>,
    generation: GenerationConfig,
    compression: CompressionConfig,
    checkpoints: Option<Checkpointer>,
    history: Vec<Message>,
    config: ClientConfig,
}

impl AgentClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: NoProvider,
            model: None,
            tools: ToolRegistry::new(),
            hooks: Arc::new(LoggingHooks::default()),
            reporter: Arc::new(LogReporter),
            intents: Arc::new(NoIntentExtractor),
            retry: RetryConfig::default(),
            credential_kind: CredentialKind::ApiKey,
            fallback: None,
            fallback_model: None,
            generation: GenerationConfig::default(),
            compression: CompressionConfig::default(),
            checkpoints: None,
            history: Vec::new(),
            config: ClientConfig::default(),
        }
    }
}

impl Default for AgentClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> AgentClientBuilder<P> {
    /// Set the LLM provider.
    #[must_use]
    pub fn provider<T>(self, provider: T) -> AgentClientBuilder<Arc<dyn LlmProvider>>
    where
        T: LlmProvider + 'static,
    {
        self.shared_provider(Arc::new(provider))
    }

    /// Set a provider that is also used elsewhere.
    #[must_use]
    pub fn shared_provider(
        self,
        provider: Arc<dyn LlmProvider>,
    ) -> AgentClientBuilder<Arc<dyn LlmProvider>> {
        AgentClientBuilder {
            provider,
            model: self.model,
            tools: self.tools,
            hooks: self.hooks,
            reporter: self.reporter,
            intents: self.intents,
            retry: self.retry,
            credential_kind: self.credential_kind,
            fallback: self.fallback,
            fallback_model: self.fallback_model,
            generation: self.generation,
            compression: self.compression,
            checkpoints: self.checkpoints,
            history: self.history,
            config: self.config,
        }
    }

    /// Defaults to [`models::DEFAULT_GEMINI_MODEL`].
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Defaults to [`LoggingHooks`] around `DenyAllHooks`.
    #[must_use]
    pub fn hooks(mut self, hooks: impl SchedulerHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    #[must_use]
    pub fn shared_hooks(mut self, hooks: Arc<dyn SchedulerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Only consulted when the provider reports no function calling.
    #[must_use]
    pub fn intent_extractor(mut self, intents: Arc<dyn IntentExtractor>) -> Self {
        self.intents = intents;
        self
    }

    #[must_use]
    pub const fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Fallback is only offered for personal OAuth credentials.
    #[must_use]
    pub const fn credential_kind(mut self, kind: CredentialKind) -> Self {
        self.credential_kind = kind;
        self
    }

    #[must_use]
    pub fn fallback(mut self, handler: Arc<dyn FallbackHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    #[must_use]
    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation = config;
        self
    }

    #[must_use]
    pub fn compression(mut self, config: CompressionConfig) -> Self {
        self.compression = config;
        self
    }

    /// Snapshot files before restorable tools run.
    #[must_use]
    pub fn checkpointing(
        mut self,
        journal: CheckpointJournal,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        self.checkpoints = Some(Checkpointer::new(journal, store));
        self.config.checkpointing = true;
        self
    }

    /// Start from an existing conversation.
    #[must_use]
    pub fn history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }
}

impl AgentClientBuilder<Arc<dyn LlmProvider>> {
    #[must_use]
    pub fn build(self) -> AgentClient {
        let model = self
            .model
            .unwrap_or_else(|| models::DEFAULT_GEMINI_MODEL.to_owned());

        let mut retry = RetryController::new(
            self.retry,
            self.credential_kind,
            ModelSelection::new(model.clone()),
        );
        if let Some(handler) = self.fallback {
            retry = retry.with_fallback(handler);
        }
        if let Some(fallback_model) = self.fallback_model {
            retry = retry.with_fallback_model(fallback_model);
        }

        let session = ChatSession::new(self.provider, model)
            .with_retry(retry)
            .with_generation_config(self.generation)
            .with_tools(self.tools.function_declarations())
            .with_history(self.history);

        let checkpoints = if self.config.checkpointing {
            if self.checkpoints.is_none() {
                log::warn!("Checkpointing enabled without a snapshot store, checkpoints are off");
            }
            self.checkpoints
        } else {
            None
        };

        let mut scheduler = ToolScheduler::new(Arc::new(self.tools), self.hooks);
        if let Some(checkpointer) = &checkpoints {
            scheduler = scheduler.with_checkpointer(checkpointer.clone());
        }

        AgentClient {
            session,
            scheduler,
            compressor: ChatCompressor::new(self.compression),
            reporter: self.reporter,
            intents: self.intents,
            checkpoints,
            config: self.config,
        }
    }
}
