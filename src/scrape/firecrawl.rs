//! Firecrawl scrape back-end
//!
//! Primary scraper for JS-heavy sites: the hosted service renders the page,
//! handles anti-bot protection, and usually returns markdown directly so
//! the local cleaner never runs. Timeout and wait parameters are in
//! milliseconds, and the service rejects `wait_for` above half the timeout,
//! so the client caps it before sending.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use super::{ScrapeError, ScrapedPage};
use crate::models::ScrapeOptions;

/// Firecrawl client configuration
#[derive(Debug, Clone)]
pub struct FirecrawlConfig {
    /// API endpoint base (default: https://api.firecrawl.dev)
    pub base_url: String,

    /// API key; absent keys fail the scrape cleanly at call time
    pub api_key: Option<String>,
}

impl Default for FirecrawlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.firecrawl.dev".to_string(),
            api_key: None,
        }
    }
}

impl FirecrawlConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("FIRECRAWL_API_URL")
                .unwrap_or_else(|_| "https://api.firecrawl.dev".to_string()),
            api_key: std::env::var("FIRECRAWL_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [&'a str],
    wait_for: u64,
    timeout: u64,
    only_main_content: bool,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeDocument>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeDocument {
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Firecrawl API client
pub struct FirecrawlScraper {
    client: Client,
    config: FirecrawlConfig,
}

impl FirecrawlScraper {
    pub fn new(config: FirecrawlConfig) -> Result<Self, ScrapeError> {
        let client = Client::builder().gzip(true).build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ScrapeError> {
        Self::new(FirecrawlConfig::from_env())
    }

    /// Client pointed at a mock server, for tests
    pub fn with_base_url(base_url: &str, api_key: &str) -> Result<Self, ScrapeError> {
        Self::new(FirecrawlConfig {
            base_url: base_url.to_string(),
            api_key: Some(api_key.to_string()),
        })
    }

    /// Scrape a URL through the rendering service
    pub async fn scrape(
        &self,
        url: &str,
        options: &ScrapeOptions,
    ) -> Result<ScrapedPage, ScrapeError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ScrapeError::MissingApiKey("FIRECRAWL_API_KEY"))?;

        let timeout_ms = options.timeout;
        // The service rejects wait_for above half the timeout
        let wait_for = if options.wait_for > timeout_ms / 2 {
            warn!(
                wait_for = options.wait_for,
                timeout_ms,
                capped = timeout_ms / 2,
                "wait_for exceeds half of timeout, capping"
            );
            timeout_ms / 2
        } else {
            options.wait_for
        };

        info!(url, timeout_ms, wait_for, "Starting firecrawl scrape");

        let request = ScrapeRequest {
            url,
            formats: &["markdown", "html"],
            wait_for,
            timeout: timeout_ms,
            only_main_content: true,
        };

        let response = self
            .client
            .post(format!("{}/v2/scrape", self.config.base_url))
            .bearer_auth(api_key)
            .timeout(Duration::from_millis(timeout_ms))
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(e, timeout_ms))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ScrapeError::RateLimited);
        }
        if status.as_u16() == 404 {
            return Err(ScrapeError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScrapeError::Provider(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }

        let parsed: ScrapeResponse = response.json().await?;
        if !parsed.success {
            let message = parsed.error.unwrap_or_else(|| "Unknown error".to_string());
            return Err(classify_provider_message(message));
        }

        let document = parsed
            .data
            .ok_or_else(|| ScrapeError::Provider("Response carried no document".to_string()))?;

        let page = ScrapedPage {
            html: document.html.unwrap_or_default(),
            markdown: document.markdown.filter(|m| !m.trim().is_empty()),
            metadata: document.metadata.unwrap_or_else(|| Value::Object(Default::default())),
        };

        info!(
            url,
            html_length = page.html.len(),
            has_markdown = page.markdown.is_some(),
            "Firecrawl scrape completed"
        );

        Ok(page)
    }
}

fn classify_transport(e: reqwest::Error, timeout_ms: u64) -> ScrapeError {
    if e.is_timeout() {
        ScrapeError::Timeout { timeout_ms }
    } else {
        ScrapeError::Http(e)
    }
}

/// Sort a provider error message into the failure taxonomy
fn classify_provider_message(message: String) -> ScrapeError {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        ScrapeError::Provider(format!("Request timeout: {message}"))
    } else if lower.contains("rate limit") || message.contains("429") {
        ScrapeError::RateLimited
    } else if lower.contains("not found") || message.contains("404") {
        ScrapeError::NotFound
    } else {
        ScrapeError::Provider(message)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
