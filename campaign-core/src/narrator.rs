//! Narrators turn a prompt into the next narrative beat.

use crate::config::EngineConfig;
use crate::context::Role;
use crate::prompt::Prompt;
use async_trait::async_trait;
use openai_chat::{ChatClient, FinishReason, Message, Request};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_MAX_TOKENS: usize = 1000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a narrator produced no reply.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("model request failed: {0}")]
    Api(#[from] openai_chat::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("model returned an empty reply")]
    EmptyReply,

    #[error("narrator unavailable: {0}")]
    Unavailable(String),
}

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct NarratorOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout: Duration,
}

impl Default for NarratorOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl NarratorOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Clamped to 0.0-1.0.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Something that can answer a prompt.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn complete(&self, prompt: &Prompt, options: &NarratorOptions)
        -> Result<String, NarratorError>;
}

/// Narrator backed by a chat-completions endpoint.
#[derive(Clone)]
pub struct ChatNarrator {
    client: ChatClient,
}

impl ChatNarrator {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Build from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self, NarratorError> {
        Ok(Self::new(ChatClient::from_env()?))
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, NarratorError> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or(openai_chat::Error::NoApiKey)?;
        let client = ChatClient::new(api_key)?
            .with_base_url(config.base_url.as_str())
            .with_model(config.narrator.model.as_str());
        Ok(Self::new(client))
    }

    fn build_request(prompt: &Prompt, options: &NarratorOptions) -> Request {
        let mut messages = Vec::with_capacity(prompt.messages.len() + 1);
        messages.push(Message::system(prompt.system.as_str()));
        messages.extend(prompt.messages.iter().map(|m| match m.role {
            Role::System => Message::system(m.content.as_str()),
            Role::User => Message::user(m.content.as_str()),
            Role::Assistant => Message::assistant(m.content.as_str()),
        }));

        Request::new(messages)
            .with_model(options.model.as_str())
            .with_temperature(options.temperature)
            .with_max_tokens(options.max_tokens)
    }
}

#[async_trait]
impl Narrator for ChatNarrator {
    async fn complete(
        &self,
        prompt: &Prompt,
        options: &NarratorOptions,
    ) -> Result<String, NarratorError> {
        let request = Self::build_request(prompt, options);
        let response = self.client.complete(request).await?;

        debug!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "completion received"
        );
        if response.finish_reason == FinishReason::Length {
            warn!(max_tokens = options.max_tokens, "reply was cut off at the token limit");
        }

        if response.content.trim().is_empty() {
            return Err(NarratorError::EmptyReply);
        }
        Ok(response.content)
    }
}

/// Narrator used when no model is configured. Every call fails, so turns
/// are still recorded but never answered.
#[derive(Debug, Clone, Default)]
pub struct OfflineNarrator;

#[async_trait]
impl Narrator for OfflineNarrator {
    async fn complete(
        &self,
        _prompt: &Prompt,
        _options: &NarratorOptions,
    ) -> Result<String, NarratorError> {
        Err(NarratorError::Unavailable(
            "no API key configured (set OPENAI_API_KEY)".to_string(),
        ))
    }
}
