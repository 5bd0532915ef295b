//! One model exchange as a stream of [`StreamEvent`]s.
//!
//! A [`Turn`] sends its input through a [`ChatSession`], converts the
//! response chunks into events and remembers the tool calls the model asked
//! for. It never executes tools; the caller hands
//! [`Turn::pending_tool_calls`] to the scheduler once the stream has ended.
//!
//! Failures end the stream with one `Error` event, except authentication
//! failures, which are yielded as `Err` so the caller can re-authenticate.
//! Tripping the cancellation token ends the stream with one
//! `UserCancelled` event and nothing after it.

use crate::chat::ChatSession;
use crate::diagnostics::{ErrorReport, ErrorReporter, LogReporter};
use crate::events::{StreamEvent, ToolCallRequestInfo};
use crate::llm::{FinishReason, Part, ProviderError};
use crate::providers::intent::{IntentExtractor, NoIntentExtractor};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Name given to function calls that arrive without one.
pub const UNDEFINED_TOOL_NAME: &str = "undefined_tool_name";

/// A fresh call id of the form `{name}-{unix millis}-{random}`.
#[must_use]
pub fn synthesize_call_id(name: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let random = Uuid::new_v4().simple().to_string();
    format!("{name}-{millis}-{}", &random[..12])
}

/// Fill in missing names and call ids on function call parts.
pub(crate) fn assign_call_identity(parts: &mut [Part]) {
    for part in parts {
        if let Part::FunctionCall { id, name, .. } = part {
            if name.is_empty() {
                UNDEFINED_TOOL_NAME.clone_into(name);
            }
            if id.as_deref().is_none_or(str::is_empty) {
                *id = Some(synthesize_call_id(name));
            }
        }
    }
}

/// Split a thought into `(subject, description)`.
///
/// The subject is the first `**bold**` span; the description is everything
/// else. Without a bold span the subject is empty.
#[must_use]
pub fn parse_thought(text: &str) -> (String, String) {
    let Some(start) = text.find("**") else {
        return (String::new(), text.trim().to_owned());
    };
    let rest = &text[start + 2..];
    let Some(len) = rest.find("**") else {
        return (String::new(), text.trim().to_owned());
    };

    let subject = rest[..len].trim().to_owned();
    let description = format!("{}{}", &text[..start], &rest[len + 2..])
        .trim()
        .to_owned();
    (subject, description)
}

pub struct Turn<'a> {
    session: &'a ChatSession,
    reporter: Arc<dyn ErrorReporter>,
    intents: Arc<dyn IntentExtractor>,
    pending: Vec<ToolCallRequestInfo>,
    finish_reason: Option<FinishReason>,
}

impl<'a> Turn<'a> {
    #[must_use]
    pub fn new(session: &'a ChatSession) -> Self {
        Self {
            session,
            reporter: Arc::new(LogReporter),
            intents: Arc::new(NoIntentExtractor),
            pending: Vec::new(),
            finish_reason: None,
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Used when the backend has no native function calling.
    #[must_use]
    pub fn with_intent_extractor(mut self, intents: Arc<dyn IntentExtractor>) -> Self {
        self.intents = intents;
        self
    }

    /// Tool calls requested during the last run, in request order.
    #[must_use]
    pub fn pending_tool_calls(&self) -> &[ToolCallRequestInfo] {
        &self.pending
    }

    #[must_use]
    pub fn take_pending_tool_calls(&mut self) -> Vec<ToolCallRequestInfo> {
        std::mem::take(&mut self.pending)
    }

    #[must_use]
    pub const fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Send `input` and stream the resulting events.
    ///
    /// A stream ends after `UsageMetadata` when the exchange succeeds, or
    /// after its single `UserCancelled` or `Error` event otherwise.
    pub fn run(
        &mut self,
        input: Vec<Part>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<StreamEvent, ProviderError>> + Send + '_ {
        self.pending.clear();
        self.finish_reason = None;
        let session = self.session;

        async_stream::stream! {
            let started = Instant::now();
            if cancel.is_cancelled() {
                yield Ok(StreamEvent::UserCancelled);
                return;
            }

            let request = serde_json::to_value(&input).unwrap_or(Value::Null);
            let inner = match session.send_stream(input, Some(cancel.clone())).await {
                Ok(inner) => inner,
                Err(e) => {
                    yield self.failure(e, request).await;
                    return;
                }
            };
            let mut inner = Box::pin(inner);
            let mut usage = None;
            let mut visible = String::new();

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    next = inner.next() => Some(next),
                };
                let Some(next) = next else {
                    yield Ok(StreamEvent::UserCancelled);
                    return;
                };
                let Some(chunk) = next else { break };
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield self.failure(e, request).await;
                        return;
                    }
                };
                if cancel.is_cancelled() {
                    yield Ok(StreamEvent::UserCancelled);
                    return;
                }

                usage = chunk.usage.or(usage);
                self.finish_reason = chunk.finish_reason.or(self.finish_reason);

                for part in chunk.parts {
                    match part {
                        Part::Thought { text } => {
                            let (subject, description) = parse_thought(&text);
                            yield Ok(StreamEvent::Thought { subject, description });
                        }
                        Part::Text { text } if !text.is_empty() => {
                            visible.push_str(&text);
                            yield Ok(StreamEvent::Content { text });
                        }
                        Part::FunctionCall { id, name, args } => {
                            let name = if name.is_empty() {
                                UNDEFINED_TOOL_NAME.to_owned()
                            } else {
                                name
                            };
                            let call_id = id
                                .filter(|id| !id.is_empty())
                                .unwrap_or_else(|| synthesize_call_id(&name));
                            let info = ToolCallRequestInfo::model(call_id, name, args);
                            self.pending.push(info.clone());
                            yield Ok(StreamEvent::ToolCallRequest(info));
                        }
                        Part::Text { .. } | Part::FunctionResponse { .. } => {}
                    }
                }
            }

            let native_tools = session
                .provider()
                .capabilities(&session.model())
                .supports_function_calling;
            if !native_tools && self.pending.is_empty() {
                for intent in self.intents.extract(&visible) {
                    let call_id = synthesize_call_id(&intent.name);
                    log::debug!(
                        "Extracted tool intent call_id={call_id} tool={}",
                        intent.name
                    );
                    let info = ToolCallRequestInfo::model(call_id, intent.name, intent.args);
                    self.pending.push(info.clone());
                    yield Ok(StreamEvent::ToolCallRequest(info));
                }
            }

            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            yield Ok(StreamEvent::UsageMetadata { usage, duration_ms });
        }
    }

    /// Map a failure to the item that ends the stream.
    async fn failure(
        &self,
        error: ProviderError,
        request: Value,
    ) -> Result<StreamEvent, ProviderError> {
        match error {
            ProviderError::Cancelled => Ok(StreamEvent::UserCancelled),
            e if e.is_authentication() => Err(e),
            e => {
                log::warn!("Turn failed status={:?} error={e}", e.status());
                let report = ErrorReport {
                    message: e.message(),
                    status: e.status(),
                    history: self.session.get_history(true),
                    request,
                    context: "turn".to_owned(),
                };
                self.reporter.report(&report).await;
                Ok(StreamEvent::error(e.message(), e.status()))
            }
        }
    }
}
