//! Lightweight HTTP-only scrape back-end
//!
//! Fallback for static pages: a plain GET with standard browser headers.
//! No JavaScript rendering, no anti-bot protection. Rate limited so
//! scheduled refreshes cannot hammer one origin, with charset-aware
//! decoding because static sites still lie about their encodings.

use encoding_rs::{Encoding, UTF_8};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::info;

use super::{ScrapeError, ScrapedPage};

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

/// Simple HTTP scraper with rate limiting
pub struct SimpleScraper {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl SimpleScraper {
    /// Create a scraper capped at `requests_per_second`
    pub fn new(requests_per_second: u32) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .gzip(true)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::new(1).unwrap());
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    /// Fetch a page over plain HTTP
    ///
    /// Timeout is in whole seconds, unlike the rendering back-end's
    /// millisecond parameters.
    pub async fn scrape(&self, url: &str, timeout_secs: u64) -> Result<ScrapedPage, ScrapeError> {
        self.rate_limiter.until_ready().await;

        info!(url, timeout_secs, "Starting simple HTTP scrape");

        let response = self
            .client
            .get(url)
            .headers(self.build_headers())
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScrapeError::Timeout {
                        timeout_ms: timeout_secs * 1000,
                    }
                } else {
                    ScrapeError::Http(e)
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            404 => return Err(ScrapeError::NotFound),
            429 => return Err(ScrapeError::RateLimited),
            code if !status.is_success() => return Err(ScrapeError::ServerError(code)),
            _ => {}
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();

        let bytes = response.bytes().await?;
        let html = decode_bytes(&bytes, &content_type);

        info!(url, status = status.as_u16(), html_length = html.len(), "Simple scrape completed");

        Ok(ScrapedPage {
            html,
            markdown: None,
            metadata: Value::Object(Default::default()),
        })
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers
    }
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0])
}

/// Decode a response body to UTF-8, honoring declared charsets
///
/// Strategy: Content-Type charset, then clean UTF-8, then a charset
/// declared in an early meta tag, then lossy UTF-8.
fn decode_bytes(bytes: &[u8], content_type: &str) -> String {
    if let Some(encoding) = charset_from_label(content_type) {
        let (text, _, _) = encoding.decode(bytes);
        return text.into_owned();
    }

    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }

    // Sniff an early <meta charset=...> declaration
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_lowercase();
    if let Some(idx) = head.find("charset=") {
        let label: String = head[idx + 8..]
            .trim_start_matches(['"', '\''])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (text, _, _) = encoding.decode(bytes);
            return text.into_owned();
        }
    }

    String::from_utf8_lossy(bytes).into_owned()
}

fn charset_from_label(content_type: &str) -> Option<&'static Encoding> {
    let lower = content_type.to_lowercase();
    let idx = lower.find("charset=")?;
    let label: String = lower[idx + 8..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    Encoding::for_label(label.as_bytes())
}
