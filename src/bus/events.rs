//! Typed event envelopes
//!
//! Minimal payloads only: each envelope references state-store side tables
//! by `job_id` rather than carrying page content or schemas, keeping every
//! message under the bus's size cap.

use serde::{Deserialize, Serialize};

use super::Topic;
use crate::models::{FailureStage, ScrapeOptions};

/// A payload bound to a fixed topic
pub trait EventPayload: Serialize {
    const TOPIC: Topic;
}

/// Which cache satisfied a job, when one did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Extraction cache: the whole pipeline was skipped
    Extraction,
    /// Content cache: only the scrape was skipped
    Content,
}

/// `extraction.requested` — entry event from the gateway or the scheduler
///
/// The gateway groups by `job_id` so jobs for the same URL never queue
/// behind each other; the scheduler groups by `hash_url(url)` so scheduled
/// refreshes of one URL are serialized. That difference is policy, not
/// plumbing — see the emit sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequested {
    pub job_id: String,
    pub url: String,
    pub scraper_id: String,
    pub options: ScrapeOptions,
}

impl EventPayload for ExtractionRequested {
    const TOPIC: Topic = Topic::ExtractionRequested;
}

/// `webpage.fetched` — content is ready in `fetch_payloads/<job_id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebpageFetched {
    pub job_id: String,
    pub url: String,
    pub scraper_id: String,
    pub options: ScrapeOptions,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_type: Option<CacheType>,
    pub markdown_length: usize,
}

impl EventPayload for WebpageFetched {
    const TOPIC: Topic = Topic::WebpageFetched;
}

/// `extraction.completed` — data is ready in `extraction_payloads/<job_id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionCompleted {
    pub job_id: String,
    pub url: String,
    pub scraper_id: String,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_type: Option<CacheType>,
}

impl EventPayload for ExtractionCompleted {
    const TOPIC: Topic = Topic::ExtractionCompleted;
}

/// `results.stored` — terminal; the job row is durable before this fires
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsStored {
    pub job_id: String,
    pub url: String,
    pub scraper_id: String,
    pub completed_at: String,
    #[serde(default)]
    pub cached: bool,
}

impl EventPayload for ResultsStored {
    const TOPIC: Topic = Topic::ResultsStored;
}

/// `extraction.failed` — consumed by the failure handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionFailed {
    pub job_id: String,
    pub error: String,
    pub stage: FailureStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
}

impl EventPayload for ExtractionFailed {
    const TOPIC: Topic = Topic::ExtractionFailed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_type_serde() {
        assert_eq!(
            serde_json::to_value(CacheType::Extraction).unwrap(),
            json!("extraction")
        );
        let parsed: CacheType = serde_json::from_value(json!("content")).unwrap();
        assert_eq!(parsed, CacheType::Content);
    }

    #[test]
    fn test_requested_envelope_stays_minimal() {
        let envelope = ExtractionRequested {
            job_id: "job_a1b2c3d4e5f6".to_string(),
            url: "https://example.com/page".to_string(),
            scraper_id: "scr_a1b2c3d4e5f6".to_string(),
            options: ScrapeOptions::default(),
        };
        let bytes = serde_json::to_vec(&envelope).unwrap();
        assert!(bytes.len() < super::super::MAX_EVENT_BYTES);
    }

    #[test]
    fn test_failed_envelope_roundtrip() {
        let envelope = ExtractionFailed {
            job_id: "job_1".to_string(),
            error: "Validation failed: title: 123 is not of type \"string\"".to_string(),
            stage: FailureStage::Storing,
            url: Some("https://example.com".to_string()),
            validation_errors: Some(vec!["title: 123 is not of type \"string\"".to_string()]),
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["stage"], "storing");

        let back: ExtractionFailed = serde_json::from_value(value).unwrap();
        assert_eq!(back.stage, FailureStage::Storing);
        assert_eq!(back.validation_errors.unwrap().len(), 1);
    }

    #[test]
    fn test_fetched_envelope_omits_absent_cache_type() {
        let envelope = WebpageFetched {
            job_id: "job_1".to_string(),
            url: "https://example.com".to_string(),
            scraper_id: "scr_1".to_string(),
            options: ScrapeOptions::default(),
            cached: false,
            cache_type: None,
            markdown_length: 120,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("cache_type").is_none());
    }
}
