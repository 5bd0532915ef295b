//! `OpenAI` Chat Completions adapter.
//!
//! Also serves `OpenAI`-compatible servers (vLLM, LM Studio, Ollama's `/v1`
//! endpoint) via [`OpenAiProvider::compatible`] and [`OpenAiProvider::ollama`].
//! Some of those servers stream cumulative snapshots instead of deltas; the
//! adapter normalizes them according to its [`ChunkSemantics`].

use crate::llm::{
    BackendKind, Capabilities, ChunkSemantics, Credentials, DeltaNormalizer, FinishReason,
    FunctionDeclaration, GenerateRequest, GenerateResponse, LlmProvider, Message, Part,
    ProviderError, Role, StreamBox, UsageMetadata, models, parse_retry_after,
};
use crate::providers::sse;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// `OpenAI` LLM provider using the Chat Completions API.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    credentials: Credentials,
    base_url: String,
    backend: BackendKind,
    semantics: ChunkSemantics,
    function_calling: bool,
}

impl OpenAiProvider {
    /// Create a provider for the hosted `OpenAI` API.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            base_url: DEFAULT_BASE_URL.to_owned(),
            backend: BackendKind::OpenAi,
            semantics: ChunkSemantics::Incremental,
            function_calling: true,
        }
    }

    /// Create a provider for any server speaking the `OpenAI` wire format.
    #[must_use]
    pub fn compatible(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            backend: BackendKind::OpenAiCompatible,
            ..Self::new(credentials)
        }
    }

    /// Create a provider for a local Ollama server.
    ///
    /// Native function calling is off by default; many local models do not
    /// support it reliably.
    #[must_use]
    pub fn ollama(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            backend: BackendKind::Ollama,
            function_calling: false,
            ..Self::new(Credentials::none())
        }
    }

    #[must_use]
    pub const fn with_chunk_semantics(mut self, semantics: ChunkSemantics) -> Self {
        self.semantics = semantics;
        self
    }

    #[must_use]
    pub const fn with_function_calling(mut self, enabled: bool) -> Self {
        self.function_calling = enabled;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, body: &ApiChatRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        if let Some(key) = self.credentials.secret() {
            builder = builder.bearer_auth(key);
        }

        let response = builder.json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            log::error!("OpenAI server error status={status} body={body}");
        } else {
            log::warn!("OpenAI client error status={status} body={body}");
        }
        Err(ProviderError::from_status(status.as_u16(), &body, retry_after))
    }

    fn build_request<'a>(
        &self,
        request: &'a GenerateRequest,
        messages: &'a [ApiMessage],
        tools: Option<&'a [ApiTool]>,
        stream: bool,
    ) -> ApiChatRequest<'a> {
        ApiChatRequest {
            model: &request.model,
            messages,
            max_completion_tokens: request.config.max_output_tokens,
            temperature: request.config.temperature,
            top_p: request.config.top_p,
            tools,
            stream,
            stream_options: (stream && self.backend == BackendKind::OpenAi)
                .then_some(ApiStreamOptions {
                    include_usage: true,
                }),
        }
    }

    fn api_tools(&self, request: &GenerateRequest) -> Option<Vec<ApiTool>> {
        (self.function_calling && !request.tools.is_empty())
            .then(|| request.tools.iter().map(convert_tool).collect())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let messages = build_api_messages(request, self.function_calling);
        let tools = self.api_tools(request);
        let api_request = self.build_request(request, &messages, tools.as_deref(), false);

        log::debug!(
            "OpenAI LLM request backend={} model={} messages={}",
            self.backend,
            request.model,
            messages.len()
        );

        let response = self.post(&api_request).await?;
        let bytes = response.bytes().await?;
        let api_response: ApiChatResponse = serde_json::from_slice(&bytes)?;
        convert_response(api_response)
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<StreamBox, ProviderError> {
        let messages = build_api_messages(request, self.function_calling);
        let tools = self.api_tools(request);
        let api_request = self.build_request(request, &messages, tools.as_deref(), true);

        log::debug!(
            "OpenAI streaming LLM request backend={} model={} semantics={:?}",
            self.backend,
            request.model,
            self.semantics
        );

        let response = self.post(&api_request).await?;
        Ok(stream_openai_response(response, self.semantics))
    }

    fn capabilities(&self, model: &str) -> Capabilities {
        Capabilities {
            supports_function_calling: self.function_calling,
            supports_vision: model.starts_with("gpt-4o") || model.starts_with("gpt-4.1"),
            max_context_length: models::token_limit(model),
        }
    }

    fn backend(&self) -> BackendKind {
        self.backend
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Without native tool support, calls and results are rendered as text.
fn build_api_messages(request: &GenerateRequest, native_tools: bool) -> Vec<ApiMessage> {
    let mut messages = Vec::new();

    // System prompt is a separate leading message in this API
    if let Some(system) = request
        .config
        .system_instruction
        .as_ref()
        .filter(|s| !s.is_empty())
    {
        messages.push(ApiMessage::text(ApiRole::System, system.clone()));
    }

    for msg in &request.contents {
        push_message(&mut messages, msg, native_tools);
    }

    messages
}

fn push_message(messages: &mut Vec<ApiMessage>, msg: &Message, native_tools: bool) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for (index, part) in msg.parts.iter().enumerate() {
        match part {
            Part::Text { text: t } => text.push_str(t),
            Part::Thought { .. } => {}
            Part::FunctionCall { name, args, .. } if !native_tools => {
                let _ = writeln!(text, "[Called tool {name} with {args}]");
            }
            Part::FunctionResponse { name, response, .. } if !native_tools => {
                let _ = writeln!(text, "[Tool {name} returned {response}]");
            }
            Part::FunctionCall { id, name, args } => tool_calls.push(ApiToolCall {
                id: id.clone().unwrap_or_else(|| format!("call_{index}")),
                r#type: "function".to_owned(),
                function: ApiFunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(args).unwrap_or_else(|_| "{}".to_owned()),
                },
            }),
            // Tool results are separate messages in this API
            Part::FunctionResponse { id, response, .. } => messages.push(ApiMessage {
                role: ApiRole::Tool,
                content: Some(serde_json::to_string(response).unwrap_or_default()),
                tool_calls: None,
                tool_call_id: Some(id.clone()),
            }),
        }
    }

    let role = match msg.role {
        Role::User => ApiRole::User,
        Role::Model => ApiRole::Assistant,
    };
    if text.is_empty() && tool_calls.is_empty() {
        return;
    }
    messages.push(ApiMessage {
        role,
        content: (!text.is_empty()).then_some(text),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
}

fn convert_tool(t: &FunctionDeclaration) -> ApiTool {
    ApiTool {
        r#type: "function".to_owned(),
        function: ApiFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        },
    }
}

fn parse_arguments(name: &str, arguments: &str) -> Result<serde_json::Value, ProviderError> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(arguments).map_err(|e| {
        ProviderError::permanent(format!("malformed arguments for tool call {name}: {e}"))
    })
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::MaxTokens,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::Safety,
        _ => FinishReason::Other,
    }
}

const fn map_usage(usage: &ApiUsage) -> UsageMetadata {
    UsageMetadata {
        prompt_token_count: usage.prompt_tokens,
        candidates_token_count: usage.completion_tokens,
        total_token_count: usage.total_tokens,
    }
}

fn convert_response(response: ApiChatResponse) -> Result<GenerateResponse, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::permanent("no choices in response"))?;

    let mut parts = Vec::new();
    if let Some(reasoning) = choice.message.reasoning_content.filter(|r| !r.is_empty()) {
        parts.push(Part::Thought { text: reasoning });
    }
    if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
        parts.push(Part::text(content));
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        let args = parse_arguments(&call.function.name, &call.function.arguments)?;
        parts.push(Part::FunctionCall {
            id: Some(call.id),
            name: call.function.name,
            args,
        });
    }

    Ok(GenerateResponse {
        parts,
        finish_reason: choice.finish_reason.as_deref().map(map_finish_reason),
        usage: response.usage.as_ref().map(map_usage),
    })
}

// ============================================================================
// SSE Stream Parser
// ============================================================================

/// Tool call fragments arrive spread over many chunks, keyed by index.
#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: String,
    arguments: String,
}

fn stream_openai_response(response: reqwest::Response, semantics: ChunkSemantics) -> StreamBox {
    Box::pin(async_stream::stream! {
        let mut lines = Box::pin(sse::data_lines(response));
        let mut text = DeltaNormalizer::new(semantics);
        let mut reasoning = DeltaNormalizer::new(semantics);
        let mut tool_calls: BTreeMap<u32, ToolCallAccumulator> = BTreeMap::new();
        let mut finish_reason = None;

        while let Some(line) = lines.next().await {
            let data = match line {
                Ok(data) => data,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if data == "[DONE]" {
                break;
            }
            let chunk: ApiStreamChunk = match serde_json::from_str(&data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::warn!("Malformed OpenAI stream chunk data={data}");
                    yield Err(ProviderError::from(e));
                    return;
                }
            };

            let mut parts = Vec::new();
            if let Some(choice) = chunk.choices.into_iter().next() {
                if let Some(reason) = choice.finish_reason.as_deref() {
                    finish_reason = Some(map_finish_reason(reason));
                }
                if let Some(r) = choice.delta.reasoning_content {
                    let delta = reasoning.push(&r);
                    if !delta.is_empty() {
                        parts.push(Part::Thought { text: delta });
                    }
                }
                if let Some(c) = choice.delta.content {
                    let delta = text.push(&c);
                    if !delta.is_empty() {
                        parts.push(Part::text(delta));
                    }
                }
                for call in choice.delta.tool_calls.unwrap_or_default() {
                    let entry = tool_calls.entry(call.index).or_default();
                    if let Some(id) = call.id {
                        entry.id = Some(id);
                    }
                    if let Some(function) = call.function {
                        if let Some(name) = function.name {
                            entry.name.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            entry.arguments.push_str(&arguments);
                        }
                    }
                }
            }

            let usage = chunk.usage.as_ref().map(map_usage);
            if !parts.is_empty() || usage.is_some() {
                yield Ok(GenerateResponse { parts, finish_reason: None, usage });
            }
        }

        let mut parts = Vec::with_capacity(tool_calls.len());
        for call in tool_calls.into_values() {
            match parse_arguments(&call.name, &call.arguments) {
                Ok(args) => parts.push(Part::FunctionCall {
                    id: call.id,
                    name: call.name,
                    args,
                }),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        yield Ok(GenerateResponse { parts, finish_reason, usage: None });
    })
}

// ============================================================================
// API Request Types
// ============================================================================

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ApiTool]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<ApiStreamOptions>,
}

#[derive(Serialize)]
struct ApiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: ApiRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    const fn text(role: ApiRole, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum ApiRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunctionCall,
}

#[derive(Serialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct ApiTool {
    r#type: String,
    function: ApiFunction,
}

#[derive(Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ApiResponseToolCall>>,
}

#[derive(Deserialize)]
struct ApiResponseToolCall {
    id: String,
    function: ApiResponseFunctionCall,
}

#[derive(Deserialize)]
struct ApiResponseFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiStreamChoice {
    #[serde(default)]
    delta: ApiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ApiStreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ApiStreamToolCall>>,
}

#[derive(Deserialize)]
struct ApiStreamToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<ApiStreamFunction>,
}

#[derive(Deserialize)]
struct ApiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
