//! Google Gemini API adapter.
//!
//! This module provides an implementation of `LlmProvider` for the Google Gemini
//! API (`generativelanguage.googleapis.com`).

pub(crate) mod data;

use crate::llm::{
    BackendKind, Capabilities, CredentialKind, Credentials, GenerateRequest, GenerateResponse,
    LlmProvider, Message, ProviderError, StreamBox, models, parse_retry_after,
};
use async_trait::async_trait;
use data::{
    ApiCountTokensRequest, ApiCountTokensResponse, ApiGenerateContentResponse,
    build_api_contents, build_api_request, convert_response,
};

pub const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini LLM provider.
#[derive(Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    credentials: Credentials,
    base_url: String,
}

impl GeminiProvider {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            base_url: API_BASE_URL.to_owned(),
        }
    }

    /// Point the adapter at a proxy or regional endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{model}:{method}", self.base_url)
    }

    /// API keys travel as a header; OAuth tokens as a bearer token.
    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (self.credentials.kind, self.credentials.secret()) {
            (_, None) => builder,
            (CredentialKind::ApiKey | CredentialKind::Local, Some(key)) => {
                builder.header("x-goog-api-key", key)
            }
            (CredentialKind::OAuthPersonal | CredentialKind::ServiceAccount, Some(token)) => {
                builder.bearer_auth(token)
            }
        }
    }

    async fn post_json<T: serde::Serialize + Sync + ?Sized>(
        &self,
        url: String,
        body: &T,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .authorize(self.client.post(url))
            .header("Content-Type", "application/json")
            .query(query)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            log::error!("Gemini server error status={status} body={body}");
        } else {
            log::warn!("Gemini client error status={status} body={body}");
        }
        Err(ProviderError::from_status(status.as_u16(), &body, retry_after))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let contents = build_api_contents(&request.contents);
        let api_request = build_api_request(request, &contents);

        log::debug!(
            "Gemini LLM request model={} messages={} tools={}",
            request.model,
            request.contents.len(),
            request.tools.len()
        );

        let response = self
            .post_json(self.endpoint(&request.model, "generateContent"), &api_request, &[])
            .await?;
        let bytes = response.bytes().await?;

        log::debug!("Gemini LLM response body_len={}", bytes.len());

        let api_response: ApiGenerateContentResponse = serde_json::from_slice(&bytes)?;
        convert_response(api_response)
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<StreamBox, ProviderError> {
        let contents = build_api_contents(&request.contents);
        let api_request = build_api_request(request, &contents);

        log::debug!(
            "Gemini streaming LLM request model={} messages={}",
            request.model,
            request.contents.len()
        );

        let response = self
            .post_json(
                self.endpoint(&request.model, "streamGenerateContent"),
                &api_request,
                &[("alt", "sse")],
            )
            .await?;

        Ok(data::stream_gemini_response(response))
    }

    async fn count_tokens(&self, model: &str, contents: &[Message]) -> Result<u32, ProviderError> {
        let contents = build_api_contents(contents);
        let response = self
            .post_json(
                self.endpoint(model, "countTokens"),
                &ApiCountTokensRequest {
                    contents: &contents,
                },
                &[],
            )
            .await?;
        let bytes = response.bytes().await?;
        let counted: ApiCountTokensResponse = serde_json::from_slice(&bytes)?;
        Ok(counted.total_tokens)
    }

    fn capabilities(&self, model: &str) -> Capabilities {
        Capabilities {
            supports_function_calling: true,
            supports_vision: !model.contains("embedding"),
            max_context_length: models::token_limit(model),
        }
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Gemini
    }
}
