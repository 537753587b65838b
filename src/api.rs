//! LLM chat-completion client for an OpenAI-compatible API.
//!
//! # Architecture
//!
//! - [`ChatCompletion`]: core trait defining one async completion round-trip
//! - [`ChatClient`]: posts to `{base_url}/chat/completions` over an [`HttpTransport`]
//! - [`backoff_delay`]: exponential backoff with jitter used between retries
//!
//! # Wire contract
//!
//! Request body: `{model, messages: [{role, content}...], max_tokens, temperature}`.
//! The answer is read from `choices[0].message.content`.

use crate::config::{
    ConfigProvider, AI_API_KEY, AI_BASE_URL, AI_MAX_TOKENS, AI_MODEL, AI_PROMPT, AI_TEMPERATURE,
};
use crate::error::{IngestError, Result};
use crate::http::{HttpTransport, API_TIMEOUT};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use rand::{rng, Rng};
use serde::{Deserialize, Serialize};
use std::time::{Duration as StdDuration, Instant};
use tracing::{debug, instrument, warn};

pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_PROMPT: &str = "Analyze the following HTML content and return a JSON array of URLs \
     that represent published posts. Only include URLs that are definitely links to published posts. \
     The response must be a valid JSON array. Here is the HTML:\n\n";

/// Upper bound for a single backoff delay.
const MAX_DELAY: StdDuration = StdDuration::from_secs(30);

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Settings for the chat-completion endpoint, read from the config provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Instruction placed before the link summary in the user message.
    pub prompt: String,
}

impl LlmSettings {
    /// Read settings. The base URL is required; everything else has defaults.
    pub fn from_config(config: &impl ConfigProvider) -> Result<Self> {
        let base_url = config.require(AI_BASE_URL)?;
        let max_tokens = match config.get_config(AI_MAX_TOKENS) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                IngestError::Configuration(format!("{AI_MAX_TOKENS} is not a number: {raw}"))
            })?,
            None => DEFAULT_MAX_TOKENS,
        };
        let temperature = match config.get_config(AI_TEMPERATURE) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                IngestError::Configuration(format!("{AI_TEMPERATURE} is not a number: {raw}"))
            })?,
            None => DEFAULT_TEMPERATURE,
        };
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.get_config(AI_API_KEY),
            model: config
                .get_config(AI_MODEL)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens,
            temperature,
            prompt: config
                .get_config(AI_PROMPT)
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Trait for async LLM interaction.
///
/// Implementors send a conversation and return the assistant's text. The
/// AI discovery fetcher only depends on this trait.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`ChatCompletion`] over an [`HttpTransport`].
#[derive(Debug)]
pub struct ChatClient<'a, H> {
    http: &'a H,
    settings: LlmSettings,
}

impl<'a, H: HttpTransport> ChatClient<'a, H> {
    pub fn new(http: &'a H, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }
}

#[async_trait]
impl<'a, H: HttpTransport> ChatCompletion for ChatClient<'a, H> {
    #[instrument(level = "info", skip_all, fields(model = %self.settings.model))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let t0 = Instant::now();
        let body = serde_json::to_value(CompletionRequest {
            model: &self.settings.model,
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        })?;

        let auth = self
            .settings
            .api_key
            .as_ref()
            .map(|key| format!("Bearer {key}"));
        let mut headers: Vec<(&str, &str)> = Vec::new();
        if let Some(auth) = auth.as_deref() {
            headers.push(("Authorization", auth));
        }

        let endpoint = self.settings.endpoint();
        let response = self
            .http
            .post_json(&endpoint, &body, &headers, API_TIMEOUT)
            .await?;
        if !response.is_success() {
            warn!(
                status = response.status,
                elapsed_ms = t0.elapsed().as_millis() as u64,
                body = %truncate_for_log(&response.body, 300),
                "Chat completion failed"
            );
            return Err(IngestError::Fetch(format!(
                "HTTP {} from {endpoint}",
                response.status
            )));
        }

        let parsed: CompletionResponse = serde_json::from_str(&response.body).map_err(|e| {
            IngestError::Fetch(format!("malformed chat completion envelope: {e}"))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                IngestError::Fetch("chat completion returned no choices".to_string())
            })?;
        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            response_preview = %truncate_for_log(&content, 300),
            "Chat completion succeeded"
        );
        Ok(content)
    }
}

/// Delay before retry number `attempt` (1-based).
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), 30s) + random_jitter(0..250ms)
/// ```
///
/// A zero `base_delay` disables both the backoff and the jitter.
pub fn backoff_delay(attempt: usize, base_delay: StdDuration) -> StdDuration {
    if base_delay.is_zero() {
        return StdDuration::ZERO;
    }
    let shift = attempt.saturating_sub(1).min(16) as u32;
    let delay = base_delay.saturating_mul(1 << shift).min(MAX_DELAY);
    let jitter_ms: u64 = rng().random_range(0..=250);
    delay + StdDuration::from_millis(jitter_ms)
}
