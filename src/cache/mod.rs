//! Dual result caches over the state store
//!
//! Two caches with different keys and different reach:
//! - **Extraction cache** (`sha256(url|schema)[..16]`): a hit collapses the
//!   whole pipeline into one state read.
//! - **Content cache** (`sha256(url)`): a hit skips only the scrape.
//!
//! Both are advisory. Misses are normal, and put failures are swallowed —
//! a job never fails because a cache write did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::Schema;
use crate::state::{ns, State};
use crate::utils::hash::{extraction_cache_key, hash_url_full};

/// Cached final extraction for a (url, schema) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionCacheEntry {
    pub data: Value,
    pub url: String,
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraper_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub cached_at: DateTime<Utc>,
}

/// Cached cleaned markdown for a URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCacheEntry {
    pub markdown: String,
    pub url: String,
    #[serde(default)]
    pub metadata: Value,
    pub cached_at: DateTime<Utc>,
}

/// Handle over both caches
#[derive(Clone)]
pub struct CacheLayer {
    state: State,
}

impl CacheLayer {
    pub fn new(state: State) -> Self {
        Self { state }
    }

    // =========================================================================
    // Extraction cache
    // =========================================================================

    /// Look up a cached extraction. Errors read as misses.
    pub async fn get_extraction(&self, url: &str, schema: &Schema) -> Option<ExtractionCacheEntry> {
        let key = extraction_cache_key(url, schema);
        match self
            .state
            .get::<ExtractionCacheEntry>(ns::EXTRACTION_CACHE, &key)
            .await
        {
            Ok(Some(entry)) if !entry.data.is_null() => {
                debug!(url, %key, "Extraction cache hit");
                Some(entry)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(url, error = %e, "Extraction cache read failed");
                None
            }
        }
    }

    /// Store a final extraction. Returns whether the write succeeded.
    pub async fn put_extraction(
        &self,
        url: &str,
        schema: &Schema,
        data: &Value,
        model: Option<&str>,
        scraper_id: Option<&str>,
        metadata: &Value,
    ) -> bool {
        let key = extraction_cache_key(url, schema);
        let entry = ExtractionCacheEntry {
            data: data.clone(),
            url: url.to_string(),
            schema: schema.clone(),
            scraper_id: scraper_id.map(str::to_string),
            model: model.map(str::to_string),
            metadata: metadata.clone(),
            cached_at: Utc::now(),
        };

        match self.state.set(ns::EXTRACTION_CACHE, &key, &entry).await {
            Ok(()) => true,
            Err(e) => {
                warn!(url, error = %e, "Extraction cache write failed");
                false
            }
        }
    }

    // =========================================================================
    // Content cache
    // =========================================================================

    /// Look up cached markdown for a URL. Errors read as misses.
    pub async fn get_content(&self, url: &str) -> Option<ContentCacheEntry> {
        let key = hash_url_full(url);
        match self
            .state
            .get::<ContentCacheEntry>(ns::CONTENT_CACHE, &key)
            .await
        {
            Ok(Some(entry)) if !entry.markdown.trim().is_empty() => {
                debug!(url, "Content cache hit");
                Some(entry)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(url, error = %e, "Content cache read failed");
                None
            }
        }
    }

    /// Store cleaned markdown for a URL. Returns whether the write succeeded.
    pub async fn put_content(&self, url: &str, markdown: &str, metadata: &Value) -> bool {
        let key = hash_url_full(url);
        let entry = ContentCacheEntry {
            markdown: markdown.to_string(),
            url: url.to_string(),
            metadata: metadata.clone(),
            cached_at: Utc::now(),
        };

        match self.state.set(ns::CONTENT_CACHE, &key, &entry).await {
            Ok(()) => true,
            Err(e) => {
                warn!(url, error = %e, "Content cache write failed");
                false
            }
        }
    }
}
