//! OpenAI completion provider for invitegate.
//!
//! Talks to the chat completions endpoint. The primary tier sends the
//! stored conversation history; the fallback tier is a single turn on the
//! cheaper fallback model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use invitegate_core::{CompletionProvider, CompletionRequest, ModelTier, ProviderFailure};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_FALLBACK_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const AUTH_ENV_VAR: &str = "OPENAI_API_KEY";

/// Provider settings, the `openai` section of the daemon config.
#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Without a key the provider reports itself unconfigured.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// HTTP-level timeout; the bridge applies its own, shorter deadline.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            fallback_model: default_fallback_model(),
            endpoint: default_endpoint(),
            system_prompt: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("fallback_model", &self.fallback_model)
            .field("endpoint", &self.endpoint)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_fallback_model() -> String {
    DEFAULT_FALLBACK_MODEL.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Chat completions request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Value,
}

impl ChatResponse {
    /// Text of the first choice.
    pub fn first_text(&self) -> Result<String, ProviderFailure> {
        let choice = self
            .choices
            .first()
            .ok_or_else(|| ProviderFailure::Malformed("response did not include choices".into()))?;
        let text = extract_text(&choice.message.content);
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderFailure::Malformed("empty completion".into()));
        }
        Ok(text.to_string())
    }
}

fn extract_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Wire seam between the provider and HTTP.
#[async_trait]
pub trait OpenAiTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest, api_key: &str)
        -> Result<ChatResponse, ProviderFailure>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl OpenAiTransport for HttpTransport {
    async fn send(
        &self,
        request: &ChatRequest,
        api_key: &str,
    ) -> Result<ChatResponse, ProviderFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderFailure::Timeout
                } else {
                    ProviderFailure::ProviderError(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderFailure::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderFailure::ProviderError(format!(
                "openai error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderFailure::Malformed(format!("invalid openai response: {e}")))
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// [`CompletionProvider`] over the chat completions API.
#[derive(Clone)]
pub struct OpenAiProvider {
    config: OpenAiConfig,
    transport: Arc<dyn OpenAiTransport>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("config", &self.config)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(
            config.endpoint.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: OpenAiConfig, transport: Arc<dyn OpenAiTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    pub fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        let model = match request.tier {
            ModelTier::Primary => &self.config.model,
            ModelTier::Fallback => &self.config.fallback_model,
        };

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(system_prompt) = self.config.system_prompt.as_deref() {
            if !system_prompt.trim().is_empty() {
                messages.push(ChatMessage::new("system", system_prompt));
            }
        }
        messages.extend(
            request
                .history
                .iter()
                .map(|entry| ChatMessage::new(entry.role.as_str(), entry.text.clone())),
        );
        messages.push(ChatMessage::new("user", request.prompt.clone()));

        ChatRequest {
            model: model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn is_configured(&self) -> bool {
        self.config.has_api_key()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderFailure::NotConfigured)?;

        let chat = self.build_request(request);
        tracing::debug!(
            model = %chat.model,
            messages = chat.messages.len(),
            "Sending chat completion"
        );
        let response = self.transport.send(&chat, api_key).await?;
        if let Some(reason) = response
            .choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
        {
            tracing::debug!(model = %chat.model, finish_reason = reason, "Chat completion finished");
        }
        response.first_text()
    }
}
