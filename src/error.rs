//! Unified error handling for the extraction pipeline
//!
//! Domain modules define their own error types (`ScrapeError`,
//! `ExtractError`, `BusError`); this module re-exports them and provides a
//! single `Error` enum plus the `ErrorKind` classification the stages use
//! when they turn a failure into an `extraction.failed` event.

use thiserror::Error;

pub use crate::bus::BusError;
pub use crate::extractor::ExtractError;
pub use crate::scrape::ScrapeError;

/// Unified result type
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classification, surfaced in failure strings and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed client input (400 at the gateway)
    InvalidInput,
    /// Referenced entity does not exist (404)
    NotFound,
    /// Scrape or LLM provider timed out
    ProviderTimeout,
    /// Provider returned HTTP 429
    ProviderRateLimit,
    /// Provider reported the page as missing
    ProviderNotFound,
    /// Any other provider-side failure
    ProviderOther,
    /// LLM returned no choices or empty content
    LlmEmpty,
    /// LLM content was not valid JSON
    LlmParse,
    /// Extracted data did not match the schema
    ValidationFailed,
    /// State-store read/write failure
    StateIo,
    /// Anything else
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::ProviderRateLimit => "provider_rate_limit",
            ErrorKind::ProviderNotFound => "provider_not_found",
            ErrorKind::ProviderOther => "provider_other",
            ErrorKind::LlmEmpty => "llm_empty",
            ErrorKind::LlmParse => "llm_parse",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::StateIo => "state_io",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

/// Unified error type for cross-module operations
#[derive(Error, Debug)]
pub enum Error {
    /// Scrape provider errors
    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    /// LLM extraction errors
    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Event bus errors
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// State-store errors
    #[error("State error: {0}")]
    State(#[source] anyhow::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn state(err: impl Into<anyhow::Error>) -> Self {
        Error::State(err.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Classify into the failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Scrape(e) => e.kind(),
            Error::Extract(e) => e.kind(),
            Error::Bus(_) => ErrorKind::Unexpected,
            Error::State(_) => ErrorKind::StateIo,
            Error::Config(_) => ErrorKind::InvalidInput,
            Error::Other(_) => ErrorKind::Unexpected,
        }
    }
}
