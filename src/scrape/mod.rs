//! Scrape providers
//!
//! Two back-ends behind one outcome type: a heavy rendering service
//! ([`firecrawl`]) for JS-heavy and bot-protected sites, and a lightweight
//! HTTP-only fallback ([`simple`]) for static pages. The Fetch stage picks
//! one per job via `use_simple_scraper`.

use serde_json::Value;
use thiserror::Error;

pub mod firecrawl;
pub mod simple;

pub use firecrawl::{FirecrawlConfig, FirecrawlScraper};
pub use simple::SimpleScraper;

use crate::error::ErrorKind;

/// A successfully scraped page
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    /// Raw HTML, possibly empty when the provider returned markdown only
    pub html: String,

    /// Markdown, when the provider produced it directly
    pub markdown: Option<String>,

    /// Page metadata (title, description, status code, ...)
    pub metadata: Value,
}

/// Errors from either scrape back-end
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// Request exceeded its deadline
    #[error("Request timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Provider returned HTTP 429
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Page not found (404)
    #[error("Page not found (404)")]
    NotFound,

    /// Required credential missing from the environment
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),

    /// Provider-reported failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Non-success status from the target server
    #[error("Server error: {0}")]
    ServerError(u16),

    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ScrapeError {
    /// Classify into the pipeline failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::Timeout { .. } => ErrorKind::ProviderTimeout,
            ScrapeError::RateLimited => ErrorKind::ProviderRateLimit,
            ScrapeError::NotFound => ErrorKind::ProviderNotFound,
            ScrapeError::MissingApiKey(_)
            | ScrapeError::Provider(_)
            | ScrapeError::ServerError(_)
            | ScrapeError::Http(_) => ErrorKind::ProviderOther,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ScrapeError::Timeout { timeout_ms: 1000 }.kind(),
            ErrorKind::ProviderTimeout
        );
        assert_eq!(ScrapeError::RateLimited.kind(), ErrorKind::ProviderRateLimit);
        assert_eq!(ScrapeError::NotFound.kind(), ErrorKind::ProviderNotFound);
        assert_eq!(
            ScrapeError::ServerError(500).kind(),
            ErrorKind::ProviderOther
        );
        assert_eq!(
            ScrapeError::MissingApiKey("FIRECRAWL_API_KEY").kind(),
            ErrorKind::ProviderOther
        );
    }

    #[test]
    fn test_missing_key_message() {
        let err = ScrapeError::MissingApiKey("FIRECRAWL_API_KEY");
        assert_eq!(
            err.to_string(),
            "FIRECRAWL_API_KEY environment variable not set"
        );
    }
}
