//! Conversation history for one session.
//!
//! [`ChatSession`] owns the ordered history. Sends are serialized: at most
//! one exchange is in flight, and exchanges commit to history in the order
//! they were started. A send commits the user message once the backend has
//! accepted the call, and the model output once the exchange has completed.
//! Nothing is committed after the cancellation token trips.
//!
//! Function calls get a call id and a name before they are yielded or
//! recorded, so history and events always agree on call identity.
//!
//! Thought fragments are never persisted. [`ChatSession::get_history`] with
//! `curated = true` returns the subset that is safe to resend; see
//! [`extract_curated_history`].

use crate::llm::{
    CredentialKind, FunctionDeclaration, GenerateRequest, GenerateResponse, GenerationConfig,
    LlmProvider, Message, Part, ProviderError, Role, StreamAccumulator,
};
use crate::retry::{ModelSelection, RetryConfig, RetryController};
use crate::turn::assign_call_identity;
use futures::{Stream, StreamExt};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

pub struct ChatSession {
    provider: Arc<dyn LlmProvider>,
    retry: RetryController,
    config: GenerationConfig,
    tools: Vec<FunctionDeclaration>,
    history: RwLock<Vec<Message>>,
    send_lock: Mutex<()>,
}

impl ChatSession {
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        let retry = RetryController::new(
            RetryConfig::default(),
            CredentialKind::ApiKey,
            ModelSelection::new(model),
        );
        Self {
            provider,
            retry,
            config: GenerationConfig::default(),
            tools: Vec::new(),
            history: RwLock::new(Vec::new()),
            send_lock: Mutex::new(()),
        }
    }

    /// Replace the retry policy. The controller's model selection becomes
    /// the session's active model.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryController) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<FunctionDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_history(self, history: Vec<Message>) -> Self {
        {
            let mut guard = self.history.write().unwrap_or_else(PoisonError::into_inner);
            for message in history {
                push_consolidated(&mut guard, message);
            }
        }
        self
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// The active model id.
    #[must_use]
    pub fn model(&self) -> String {
        self.retry.model().get()
    }

    #[must_use]
    pub const fn model_selection(&self) -> &ModelSelection {
        self.retry.model()
    }

    #[must_use]
    pub const fn generation_config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Append one message, waiting for any in-flight send to finish first.
    pub async fn add_history(&self, message: Message) {
        let _guard = self.send_lock.lock().await;
        self.commit(message);
    }

    /// Replace the entire history.
    pub async fn set_history(&self, history: Vec<Message>) {
        let _guard = self.send_lock.lock().await;
        self.replace_unlocked(history);
    }

    pub async fn clear_history(&self) {
        self.set_history(Vec::new()).await;
    }

    /// Copy of the history; `curated` drops malformed model turns.
    #[must_use]
    pub fn get_history(&self, curated: bool) -> Vec<Message> {
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        if curated {
            extract_curated_history(&history)
        } else {
            history.clone()
        }
    }

    /// The most recent model message, if any.
    #[must_use]
    pub fn last_model_message(&self) -> Option<Message> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|m| m.role == Role::Model)
            .cloned()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Token count of the curated history, as reported by the provider.
    ///
    /// # Errors
    /// Propagates the provider's counting error.
    pub async fn count_tokens(&self) -> Result<u32, ProviderError> {
        let history = self.get_history(true);
        self.provider.count_tokens(&self.model(), &history).await
    }

    /// Send one message and wait for the complete response.
    ///
    /// # Errors
    /// Returns the provider error once retries are exhausted, or
    /// [`ProviderError::Cancelled`] if `cancel` trips before the exchange
    /// commits.
    pub async fn send(
        &self,
        parts: Vec<Part>,
        cancel: Option<&CancellationToken>,
    ) -> Result<GenerateResponse, ProviderError> {
        let _guard = self.send_lock.lock().await;
        self.send_unlocked(parts, cancel).await
    }

    /// Take exclusive hold of the session.
    ///
    /// Other sends and history writes queue behind the returned guard until
    /// it is dropped, so a read-modify-write through it cannot interleave
    /// with them.
    pub async fn lock(&self) -> HistoryLock<'_> {
        HistoryLock {
            session: self,
            _guard: self.send_lock.lock().await,
        }
    }

    async fn send_unlocked(
        &self,
        parts: Vec<Part>,
        cancel: Option<&CancellationToken>,
    ) -> Result<GenerateResponse, ProviderError> {
        let user = Message::user_parts(strip_thoughts(parts));
        let request = self.build_request(&user);

        let provider = Arc::clone(&self.provider);
        let mut response = self
            .retry
            .call(cancel, |model| {
                let provider = Arc::clone(&provider);
                let request = GenerateRequest {
                    model,
                    ..request.clone()
                };
                async move { provider.generate(&request).await }
            })
            .await?;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(ProviderError::Cancelled);
        }

        assign_call_identity(&mut response.parts);
        let mut accumulator = StreamAccumulator::new();
        accumulator.apply(&response);
        self.commit(user);
        self.commit(Message::model_parts(accumulator.into_parts()));
        Ok(response)
    }

    /// Send one message and stream the response.
    ///
    /// The session stays locked until the returned stream ends or is
    /// dropped. The model output is committed only if the stream runs to
    /// completion without error and `cancel` has not tripped.
    ///
    /// # Errors
    /// Fails if the backend does not accept the call; nothing is committed
    /// in that case.
    pub async fn send_stream(
        &self,
        parts: Vec<Part>,
        cancel: Option<CancellationToken>,
    ) -> Result<impl Stream<Item = Result<GenerateResponse, ProviderError>> + Send + '_, ProviderError>
    {
        let guard = self.send_lock.lock().await;
        let user = Message::user_parts(strip_thoughts(parts));
        let request = self.build_request(&user);

        let provider = Arc::clone(&self.provider);
        let mut inner = self
            .retry
            .call(cancel.as_ref(), |model| {
                let provider = Arc::clone(&provider);
                let request = GenerateRequest {
                    model,
                    ..request.clone()
                };
                async move { provider.generate_stream(&request).await }
            })
            .await?;

        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(ProviderError::Cancelled);
        }
        self.commit(user);

        Ok(async_stream::stream! {
            let _guard = guard;
            let mut accumulator = StreamAccumulator::new();

            while let Some(chunk) = inner.next().await {
                match chunk {
                    Ok(mut chunk) => {
                        assign_call_identity(&mut chunk.parts);
                        accumulator.apply(&chunk);
                        yield Ok(chunk);
                    }
                    Err(e) => {
                        log::warn!("Response stream failed, model output not recorded error={e}");
                        yield Err(e);
                        return;
                    }
                }
            }

            if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return;
            }
            self.commit(Message::model_parts(accumulator.into_parts()));
        })
    }

    fn build_request(&self, user: &Message) -> GenerateRequest {
        let mut contents = self.get_history(true);
        contents.push(user.clone());
        GenerateRequest {
            model: self.model(),
            contents,
            config: self.config.clone(),
            tools: self.tools.clone(),
        }
    }

    fn replace_unlocked(&self, history: Vec<Message>) {
        let mut guard = self.history.write().unwrap_or_else(PoisonError::into_inner);
        guard.clear();
        for message in history {
            push_consolidated(&mut guard, message);
        }
    }

    fn commit(&self, message: Message) {
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        push_consolidated(&mut history, message);
    }
}

/// Exclusive hold on a [`ChatSession`], from [`ChatSession::lock`].
pub struct HistoryLock<'a> {
    session: &'a ChatSession,
    _guard: MutexGuard<'a, ()>,
}

impl HistoryLock<'_> {
    #[must_use]
    pub fn session(&self) -> &ChatSession {
        self.session
    }

    #[must_use]
    pub fn history(&self, curated: bool) -> Vec<Message> {
        self.session.get_history(curated)
    }

    /// Same as [`ChatSession::send`], without giving up the hold.
    ///
    /// # Errors
    /// See [`ChatSession::send`].
    pub async fn send(
        &mut self,
        parts: Vec<Part>,
        cancel: Option<&CancellationToken>,
    ) -> Result<GenerateResponse, ProviderError> {
        self.session.send_unlocked(parts, cancel).await
    }

    pub fn set_history(&mut self, history: Vec<Message>) {
        self.session.replace_unlocked(history);
    }
}

fn strip_thoughts(parts: Vec<Part>) -> Vec<Part> {
    parts.into_iter().filter(|p| !p.is_thought()).collect()
}

/// Append `message`, merging text into the previous entry when both are
/// text-only messages from the model.
fn push_consolidated(history: &mut Vec<Message>, mut message: Message) {
    message.parts.retain(|p| !p.is_thought());

    if message.role == Role::Model
        && message.is_text_only()
        && let Some(last) = history.last_mut()
        && last.role == Role::Model
        && last.is_text_only()
    {
        let text = message.text();
        if let Some(Part::Text { text: tail }) = last.parts.last_mut() {
            tail.push_str(&text);
        }
        return;
    }
    history.push(message);
}

/// Curated view of `history`.
///
/// Each run of consecutive model messages is kept only if every message in
/// it is valid; otherwise the whole run is dropped. User messages are always
/// kept.
#[must_use]
pub fn extract_curated_history(history: &[Message]) -> Vec<Message> {
    let mut curated = Vec::with_capacity(history.len());
    let mut i = 0;

    while i < history.len() {
        if history[i].role == Role::User {
            curated.push(history[i].clone());
            i += 1;
            continue;
        }

        let start = i;
        let mut valid = true;
        while i < history.len() && history[i].role == Role::Model {
            valid &= history[i].is_valid();
            i += 1;
        }
        if valid {
            curated.extend_from_slice(&history[start..i]);
        } else {
            log::debug!("Dropping malformed model turn from curated history messages={}", i - start);
        }
    }

    curated
}
