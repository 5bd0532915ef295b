use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Author of a [`Message`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One content fragment of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },

    /// Reasoning emitted by the model. Shown to the user, never persisted.
    Thought {
        text: String,
    },

    FunctionCall {
        /// Backend-supplied call id, when the backend provides one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        #[serde(default)]
        args: Value,
    },

    FunctionResponse {
        id: String,
        name: String,
        response: Value,
    },
}

impl Part {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub const fn is_thought(&self) -> bool {
        matches!(self, Self::Thought { .. })
    }

    /// Whether the part carries something a backend will accept.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::Text { text } => !text.is_empty(),
            Self::Thought { .. } => true,
            Self::FunctionCall { name, .. } => !name.is_empty(),
            Self::FunctionResponse { id, name, .. } => !id.is_empty() && !name.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    #[must_use]
    pub const fn user_parts(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    #[must_use]
    pub const fn model_parts(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    /// Concatenated visible text of the message. Thoughts are skipped.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn has_function_call(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::FunctionCall { .. }))
    }

    #[must_use]
    pub fn is_text_only(&self) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(|p| matches!(p, Part::Text { .. }))
    }

    /// A message is valid when it has at least one part and every part is
    /// well formed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(Part::is_well_formed)
    }
}

/// A function the model may call, as advertised in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Sampling parameters and system prompt for a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

impl GenerationConfig {
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    #[must_use]
    pub const fn with_max_output_tokens(mut self, max_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_system_instruction(mut self, system: impl Into<String>) -> Self {
        self.system_instruction = Some(system.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub contents: Vec<Message>,
    pub config: GenerationConfig,
    pub tools: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    ToolCalls,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_token_count: u32,
    pub candidates_token_count: u32,
    pub total_token_count: u32,
}

/// A complete response, or one chunk of a streamed response.
///
/// Streamed chunks always carry incremental text: adapters normalize
/// cumulative backends before yielding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    pub parts: Vec<Part>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<UsageMetadata>,
}

impl GenerateResponse {
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn function_calls(&self) -> impl Iterator<Item = (Option<&str>, &str, &Value)> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionCall { id, name, args } => Some((id.as_deref(), name.as_str(), args)),
            _ => None,
        })
    }
}

/// Advisory capability flags reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_function_calling: bool,
    pub supports_vision: bool,
    pub max_context_length: Option<u32>,
}

/// Backends with a built-in adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Gemini,
    OpenAi,
    OpenAiCompatible,
    Ollama,
}

impl BackendKind {
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Some(Self::Gemini),
            "openai" => Some(Self::OpenAi),
            "openai-compatible" | "openai_compatible" => Some(Self::OpenAiCompatible),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::OpenAiCompatible => "openai-compatible",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// How the caller authenticated. Decides whether model fallback is offered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    #[default]
    ApiKey,
    OAuthPersonal,
    ServiceAccount,
    Local,
}

impl CredentialKind {
    /// Personal OAuth quotas are per model, so switching model can help.
    #[must_use]
    pub const fn supports_fallback(self) -> bool {
        matches!(self, Self::OAuthPersonal)
    }
}

/// Opaque credential handle. The key is never serialized or printed.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub kind: CredentialKind,
    #[serde(skip)]
    api_key: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::ApiKey,
            api_key: Some(key.into()),
        }
    }

    #[must_use]
    pub fn oauth_personal(token: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::OAuthPersonal,
            api_key: Some(token.into()),
        }
    }

    #[must_use]
    pub const fn none() -> Self {
        Self {
            kind: CredentialKind::Local,
            api_key: None,
        }
    }

    #[must_use]
    pub fn secret(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Backend id, resolved with [`BackendKind::from_id`].
    pub backend: String,
    pub model: String,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(backend: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
            credentials: Credentials::default(),
            endpoint: None,
            generation: GenerationConfig::default(),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_validity() {
        assert!(Message::model("hi").is_valid());
        assert!(!Message::model("").is_valid());
        assert!(!Message::model_parts(vec![]).is_valid());
        assert!(
            !Message::model_parts(vec![Part::FunctionCall {
                id: None,
                name: String::new(),
                args: json!({}),
            }])
            .is_valid()
        );
    }

    #[test]
    fn test_message_text_skips_thoughts() {
        let msg = Message::model_parts(vec![
            Part::Thought {
                text: "**Plan** think".into(),
            },
            Part::text("Hello "),
            Part::text("world"),
        ]);
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn test_part_serialization_is_tagged() -> anyhow::Result<()> {
        let part = Part::FunctionCall {
            id: Some("c1".into()),
            name: "list_files".into(),
            args: json!({"dir": "."}),
        };
        let value = serde_json::to_value(&part)?;
        assert_eq!(value["type"], "function_call");
        assert_eq!(value["name"], "list_files");

        let back: Part = serde_json::from_value(value)?;
        assert_eq!(back, part);
        Ok(())
    }

    #[test]
    fn test_backend_kind_from_id() {
        assert_eq!(BackendKind::from_id("gemini"), Some(BackendKind::Gemini));
        assert_eq!(BackendKind::from_id(" OpenAI "), Some(BackendKind::OpenAi));
        assert_eq!(BackendKind::from_id("ollama"), Some(BackendKind::Ollama));
        assert_eq!(BackendKind::from_id("mystery"), None);
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = Credentials::api_key("sk-secret");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_credentials_never_serialized() -> anyhow::Result<()> {
        let config = ProviderConfig::new("gemini", "gemini-2.5-pro")
            .with_credentials(Credentials::api_key("sk-secret"));
        let json = serde_json::to_string(&config)?;
        assert!(!json.contains("sk-secret"));
        Ok(())
    }

    #[test]
    fn test_only_personal_oauth_supports_fallback() {
        assert!(CredentialKind::OAuthPersonal.supports_fallback());
        assert!(!CredentialKind::ApiKey.supports_fallback());
        assert!(!CredentialKind::Local.supports_fallback());
    }
}
