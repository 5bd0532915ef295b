//! Gemini API wire types, conversion functions, and SSE stream parser.

use crate::llm::{
    FinishReason, FunctionDeclaration, GenerateRequest, GenerateResponse, Message, Part,
    ProviderError, Role, StreamBox, UsageMetadata,
};
use crate::providers::sse;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

// ============================================================================
// API Request Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGenerateContentRequest<'a> {
    pub contents: &'a [ApiContent],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ApiToolConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<ApiGenerationConfig>,
}

#[derive(Serialize)]
pub struct ApiCountTokensRequest<'a> {
    pub contents: &'a [ApiContent],
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Parts can be missing in some edge cases (e.g., empty responses, safety blocks)
    #[serde(default)]
    pub parts: Vec<ApiPart>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum ApiPart {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: ApiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: ApiFunctionResponse,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
    },
    /// Catch-all for unknown part types to prevent parse failures
    Unknown(serde_json::Value),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiToolConfig {
    pub function_declarations: Vec<ApiFunctionDeclaration>,
}

#[derive(Serialize)]
pub struct ApiFunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiGenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<ApiCandidate>,
    pub usage_metadata: Option<ApiUsageMetadata>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiCandidate {
    #[serde(default = "empty_content")]
    pub content: ApiContent,
    pub finish_reason: Option<String>,
}

const fn empty_content() -> ApiContent {
    ApiContent {
        role: None,
        parts: Vec::new(),
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct ApiUsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCountTokensResponse {
    #[serde(default)]
    pub total_tokens: u32,
}

// ============================================================================
// Conversion Functions
// ============================================================================

pub fn build_api_contents(messages: &[Message]) -> Vec<ApiContent> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::User => "user",
                Role::Model => "model",
            };
            let parts = msg
                .parts
                .iter()
                .filter_map(|part| match part {
                    Part::Text { text } => Some(ApiPart::Text {
                        text: text.clone(),
                        thought: None,
                    }),
                    // Thoughts never go back to the backend
                    Part::Thought { .. } => None,
                    Part::FunctionCall { id, name, args } => Some(ApiPart::FunctionCall {
                        function_call: ApiFunctionCall {
                            id: id.clone(),
                            name: name.clone(),
                            args: args.clone(),
                        },
                    }),
                    Part::FunctionResponse { id, name, response } => {
                        Some(ApiPart::FunctionResponse {
                            function_response: ApiFunctionResponse {
                                id: Some(id.clone()),
                                name: name.clone(),
                                response: response.clone(),
                            },
                        })
                    }
                })
                .collect();
            ApiContent {
                role: Some(role.to_owned()),
                parts,
            }
        })
        .collect()
}

pub fn build_api_request<'a>(
    request: &GenerateRequest,
    contents: &'a [ApiContent],
) -> ApiGenerateContentRequest<'a> {
    let system_instruction = request
        .config
        .system_instruction
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|system| ApiContent {
            role: None,
            parts: vec![ApiPart::Text {
                text: system.clone(),
                thought: None,
            }],
        });

    let tools = (!request.tools.is_empty()).then(|| vec![convert_tools(&request.tools)]);

    ApiGenerateContentRequest {
        contents,
        system_instruction,
        tools,
        generation_config: Some(ApiGenerationConfig {
            temperature: request.config.temperature,
            top_p: request.config.top_p,
            max_output_tokens: request.config.max_output_tokens,
        }),
    }
}

fn convert_tools(tools: &[FunctionDeclaration]) -> ApiToolConfig {
    ApiToolConfig {
        function_declarations: tools
            .iter()
            .map(|t| ApiFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect(),
    }
}

pub fn build_parts(content: &ApiContent) -> Vec<Part> {
    let mut parts = Vec::new();

    for part in &content.parts {
        match part {
            ApiPart::Text { text, thought } => {
                if thought.unwrap_or(false) {
                    parts.push(Part::Thought { text: text.clone() });
                } else if !text.is_empty() {
                    parts.push(Part::text(text.clone()));
                }
            }
            ApiPart::FunctionCall { function_call } => {
                parts.push(Part::FunctionCall {
                    id: function_call.id.clone().filter(|id| !id.is_empty()),
                    name: function_call.name.clone(),
                    args: function_call.args.clone(),
                });
            }
            ApiPart::FunctionResponse { .. } => {
                // Function responses in the response are unusual, skip them
            }
            ApiPart::Unknown(value) => {
                log::warn!("Unknown API part type in Gemini response, skipping part={value:?}");
            }
        }
    }

    parts
}

pub fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::MaxTokens,
        "SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => FinishReason::Safety,
        "RECITATION" => FinishReason::Recitation,
        _ => FinishReason::Other,
    }
}

const fn map_usage(usage: ApiUsageMetadata) -> UsageMetadata {
    UsageMetadata {
        prompt_token_count: usage.prompt_token_count,
        candidates_token_count: usage.candidates_token_count,
        total_token_count: usage.total_token_count,
    }
}

/// Convert one API response (complete or a single stream chunk).
///
/// A response without candidates and without usage is malformed.
pub fn convert_response(
    response: ApiGenerateContentResponse,
) -> Result<GenerateResponse, ProviderError> {
    let usage = response.usage_metadata.map(map_usage);
    let Some(candidate) = response.candidates.into_iter().next() else {
        if usage.is_some() {
            return Ok(GenerateResponse {
                usage,
                ..GenerateResponse::default()
            });
        }
        return Err(ProviderError::permanent("no candidates in response"));
    };

    Ok(GenerateResponse {
        parts: build_parts(&candidate.content),
        finish_reason: candidate.finish_reason.as_deref().map(map_finish_reason),
        usage,
    })
}

// ============================================================================
// SSE Stream Parser
// ============================================================================

/// Parse a Gemini SSE response stream into response chunks.
///
/// Each SSE event contains independent, incremental text, not cumulative.
pub fn stream_gemini_response(response: reqwest::Response) -> StreamBox {
    Box::pin(async_stream::stream! {
        let mut lines = Box::pin(sse::data_lines(response));

        while let Some(line) = lines.next().await {
            let data = match line {
                Ok(data) => data,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let chunk = serde_json::from_str::<ApiGenerateContentResponse>(&data)
                .map_err(ProviderError::from)
                .and_then(convert_response);
            match chunk {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => {
                    log::warn!("Malformed Gemini stream chunk data={data}");
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
