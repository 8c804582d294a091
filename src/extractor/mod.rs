//! LLM extraction client
//!
//! Talks to an OpenAI-compatible chat-completions endpoint with a JSON
//! response format and temperature 0.0, so identical content and schema
//! produce identical extractions as far as the provider allows. Transient
//! provider failures (timeout, 429, 5xx) are retried with backoff; parse
//! failures are not.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub mod prompt;

pub use prompt::{build_system_prompt, build_user_prompt};

use crate::error::ErrorKind;
use crate::models::Schema;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Default model when neither the job nor the environment picks one
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// LLM client configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API endpoint base (default: https://api.openai.com/v1)
    pub base_url: String,

    /// API key; absent keys fail the extraction cleanly at call time
    pub api_key: Option<String>,

    /// Model name (default: gpt-4o-mini)
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Sampling temperature (0.0 for deterministic extraction)
    pub temperature: f32,

    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 60,
            temperature: 0.0,
            max_retries: 3,
        }
    }
}

impl LlmConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            timeout_secs: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            temperature: 0.0,
            max_retries: std::env::var("OPENAI_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        }
    }
}

/// Errors from the extraction call
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("LLM returned empty response")]
    EmptyChoices,

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Failed to parse JSON response: {0}")]
    Parse(String),

    #[error("LLM request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM rate limit exceeded")]
    RateLimited,

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ExtractError {
    /// Classify into the pipeline failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::EmptyChoices | ExtractError::EmptyContent => ErrorKind::LlmEmpty,
            ExtractError::Parse(_) => ErrorKind::LlmParse,
            ExtractError::Timeout(_) => ErrorKind::ProviderTimeout,
            ExtractError::RateLimited => ErrorKind::ProviderRateLimit,
            ExtractError::InvalidInput(_) => ErrorKind::InvalidInput,
            ExtractError::MissingApiKey | ExtractError::Api { .. } | ExtractError::Http(_) => {
                ErrorKind::ProviderOther
            }
        }
    }

    /// Whether another attempt could succeed
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ExtractError::Timeout(_)
                | ExtractError::RateLimited
                | ExtractError::Api { status: 500..=599, .. }
        )
    }
}

/// A successful extraction
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Parsed JSON object matching the schema
    pub data: Value,
    /// Model that produced it
    pub model: String,
    /// Provider-reported token usage
    pub usage: Value,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible extraction client
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn with_config(config: LlmConfig) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ExtractError> {
        Self::with_config(LlmConfig::from_env())
    }

    /// Client pointed at a mock server, for tests
    pub fn with_base_url(base_url: &str, api_key: &str) -> Result<Self, ExtractError> {
        Self::with_config(LlmConfig {
            base_url: base_url.to_string(),
            api_key: Some(api_key.to_string()),
            ..LlmConfig::default()
        })
    }

    /// Extract structured data from markdown per the schema
    ///
    /// `model_override` (from the job options) wins over the configured
    /// model.
    pub async fn extract(
        &self,
        markdown: &str,
        schema: &Schema,
        model_override: Option<&str>,
    ) -> Result<Extraction, ExtractError> {
        let markdown = markdown.trim();
        if markdown.is_empty() {
            return Err(ExtractError::InvalidInput(
                "markdown content cannot be empty".to_string(),
            ));
        }

        if self.config.api_key.is_none() {
            return Err(ExtractError::MissingApiKey);
        }

        let model = model_override.unwrap_or(&self.config.model).to_string();
        let system_prompt = build_system_prompt();
        let user_prompt = build_user_prompt(schema, markdown);

        info!(
            %model,
            markdown_length = markdown.len(),
            schema_type = if schema.is_structured() { "json_schema" } else { "prompt" },
            "Starting LLM extraction"
        );

        let retry = RetryConfig::new(self.config.max_retries);
        let result = with_retry_if(
            &retry,
            || async {
                self.request(&model, system_prompt, &user_prompt)
                    .await
                    .map_err(anyhow::Error::new)
            },
            |e| {
                e.downcast_ref::<ExtractError>()
                    .map(ExtractError::is_transient)
                    .unwrap_or(false)
            },
        )
        .await;

        let extraction = result.map_err(|e| {
            e.downcast::<ExtractError>()
                .unwrap_or_else(|e| ExtractError::Parse(e.to_string()))
        })?;

        info!(
            model = %extraction.model,
            data_keys = ?extraction.data.as_object().map(|o| o.keys().collect::<Vec<_>>()),
            "LLM extraction completed"
        );

        Ok(extraction)
    }

    /// One chat-completions round trip
    async fn request(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Extraction, ExtractError> {
        let api_key = self.config.api_key.as_deref().ok_or(ExtractError::MissingApiKey)?;

        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::Timeout(self.config.timeout_secs)
                } else {
                    ExtractError::Http(e)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExtractError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Api {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let choice = parsed.choices.into_iter().next().ok_or(ExtractError::EmptyChoices)?;
        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(ExtractError::EmptyContent)?;

        let data: Value =
            serde_json::from_str(&content).map_err(|e| ExtractError::Parse(e.to_string()))?;

        Ok(Extraction {
            data,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            usage: parsed.usage.unwrap_or_else(|| Value::Object(Default::default())),
        })
    }
}
