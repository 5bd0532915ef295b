//! Retry and model fallback around a single provider call.
//!
//! [`RetryController::call`] re-issues a failing call with exponential
//! backoff while the error is transient. When a rate limit persists after
//! every retry, and the caller's credentials allow it, an injected
//! [`FallbackHandler`] may pick another model. The choice is written to the
//! shared [`ModelSelection`], so it sticks for the rest of the session.

use crate::llm::{CredentialKind, ProviderError, models};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior on transient errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (for testing)
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Create a retry config with fast retries (for testing)
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 10,
            max_delay_ms: 100,
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Delay before retry number `attempt` (1-based).
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    // Exponential backoff: base, base*2, base*4, base*8, ...
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    let base_delay = config.base_delay_ms.saturating_mul(factor);

    // Up to a quarter of the base delay of jitter, against thundering herds
    let max_jitter = config.base_delay_ms / 4;
    let jitter = if max_jitter > 0 {
        u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) % max_jitter
    } else {
        0
    };

    let delay_ms = base_delay.saturating_add(jitter).min(config.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// The active model id, shared by everything that issues requests for one
/// session.
#[derive(Clone, Debug)]
pub struct ModelSelection(Arc<RwLock<String>>);

impl ModelSelection {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(model.into())))
    }

    #[must_use]
    pub fn get(&self) -> String {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, model: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = model.into();
    }
}

/// Decides whether to switch models after a persistent rate limit.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Return the model to continue with, or `None` to give up.
    async fn on_persistent_rate_limit(
        &self,
        current_model: &str,
        suggested_model: &str,
        error: &ProviderError,
    ) -> Option<String>;
}

/// Always accepts the suggested model.
pub struct AcceptSuggestedFallback;

#[async_trait]
impl FallbackHandler for AcceptSuggestedFallback {
    async fn on_persistent_rate_limit(
        &self,
        _current_model: &str,
        suggested_model: &str,
        _error: &ProviderError,
    ) -> Option<String> {
        Some(suggested_model.to_owned())
    }
}

pub struct RetryController {
    config: RetryConfig,
    credential_kind: CredentialKind,
    model: ModelSelection,
    fallback: Option<Arc<dyn FallbackHandler>>,
    fallback_model: String,
}

impl RetryController {
    #[must_use]
    pub fn new(config: RetryConfig, credential_kind: CredentialKind, model: ModelSelection) -> Self {
        Self {
            config,
            credential_kind,
            model,
            fallback: None,
            fallback_model: models::DEFAULT_GEMINI_FLASH_MODEL.to_owned(),
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, handler: Arc<dyn FallbackHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Model suggested to the fallback handler.
    #[must_use]
    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = model.into();
        self
    }

    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    #[must_use]
    pub const fn model(&self) -> &ModelSelection {
        &self.model
    }

    /// Run `op` with the active model until it succeeds, fails permanently,
    /// or retries run out.
    ///
    /// `op` receives the model id to use for that attempt.
    ///
    /// # Errors
    /// Returns the last error once retries and fallback are exhausted,
    /// any non-retryable error immediately, and
    /// [`ProviderError::Cancelled`] if `cancel` trips while waiting.
    pub async fn call<T, F, Fut>(
        &self,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let mut fallback_used = false;

        'cycle: loop {
            let mut attempt: u32 = 0;
            loop {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    return Err(ProviderError::Cancelled);
                }

                let model = self.model.get();
                let error = match op(model.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(e) if !e.is_retryable() => return Err(e),
                    Err(e) => e,
                };

                if attempt >= self.config.max_retries {
                    if error.is_rate_limited()
                        && !fallback_used
                        && self.try_fallback(&model, &error).await
                    {
                        fallback_used = true;
                        continue 'cycle;
                    }
                    log::warn!(
                        "Giving up after {} retries model={model} error={error}",
                        self.config.max_retries
                    );
                    return Err(error);
                }

                attempt += 1;
                let delay = error.retry_after_ms().map_or_else(
                    || calculate_backoff_delay(attempt, &self.config),
                    |ms| Duration::from_millis(ms.min(self.config.max_delay_ms)),
                );
                log::warn!(
                    "Retrying provider call attempt={attempt}/{} delay_ms={} model={model} error={error}",
                    self.config.max_retries,
                    delay.as_millis()
                );

                match cancel {
                    Some(token) => {
                        tokio::select! {
                            () = token.cancelled() => return Err(ProviderError::Cancelled),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }

    /// Ask the fallback handler for a new model. Returns whether the active
    /// model changed.
    async fn try_fallback(&self, current: &str, error: &ProviderError) -> bool {
        if !self.credential_kind.supports_fallback() {
            return false;
        }
        let Some(handler) = &self.fallback else {
            return false;
        };

        match handler
            .on_persistent_rate_limit(current, &self.fallback_model, error)
            .await
        {
            Some(next) if next != current => {
                log::info!("Switching model after persistent rate limit from={current} to={next}");
                self.model.set(next);
                true
            }
            _ => false,
        }
    }
}
