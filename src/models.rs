//! Core data structures
//!
//! Everything that crosses a module boundary lives here: scrapers and their
//! schemas, jobs and their status machine, monitors, merged scrape options,
//! and the side-table rows the pipeline stages hand each other through the
//! state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::hash::canonical_json;

// ============================================================================
// Schema
// ============================================================================

/// Extraction schema: either a natural-language prompt or a JSON Schema
///
/// Serialized untagged so stored scrapers carry the user's original shape:
/// a JSON string deserializes to `Prompt`, an object to `Structured`.
/// Only the structured branch participates in validation and in cache-key
/// canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schema {
    /// Natural-language extraction prompt
    Prompt(String),
    /// JSON Schema object (draft 2020-12)
    Structured(Value),
}

impl Schema {
    /// Canonical string form used in cache keys
    ///
    /// Structured schemas are serialized with recursively sorted keys so
    /// key ordering never changes the cache key; prompts are used verbatim.
    pub fn canonical(&self) -> String {
        match self {
            Schema::Prompt(text) => text.clone(),
            Schema::Structured(value) => canonical_json(value),
        }
    }

    /// The JSON Schema object, if this is a structured schema
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Schema::Structured(value) => Some(value),
            Schema::Prompt(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Schema::Structured(_))
    }
}

// ============================================================================
// Scrape options
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_wait_for() -> u64 {
    2000
}

fn default_timeout() -> u64 {
    30_000
}

/// Merged per-job scraping options
///
/// The gateway merges request options over the scraper's saved options
/// (request wins per key) and the result rides the event envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOptions {
    /// Consult the extraction/content caches before doing work
    #[serde(default = "default_true")]
    pub use_cache: bool,

    /// Wait time in milliseconds for JS to render (heavy back-end only)
    #[serde(default = "default_wait_for")]
    pub wait_for: u64,

    /// Scrape timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Use the lightweight HTTP-only back-end instead of the rendering one
    #[serde(default)]
    pub use_simple_scraper: bool,

    /// LLM model override for the extract stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            wait_for: default_wait_for(),
            timeout: default_timeout(),
            use_simple_scraper: false,
            model: None,
        }
    }
}

// ============================================================================
// Scraper
// ============================================================================

/// Schedule as the user supplies it: minutes or a cron expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSpec {
    /// Interval in minutes (minimum 5)
    Minutes(u64),
    /// Cron expression, e.g. `"0 */1 * * *"`
    Cron(String),
}

/// Parsed schedule kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Interval,
    Cron,
}

/// Parsed schedule attached to a scraper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

/// A persisted scraper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scraper {
    /// Id with `scr_` prefix + 12 hex
    pub scraper_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub schema: Schema,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_info: Option<ScheduleInfo>,

    #[serde(default)]
    pub options: ScrapeOptions,

    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Job
// ============================================================================

/// Job lifecycle states, in pipeline order
///
/// Status only moves forward; `Completed` and `Failed` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Fetching,
    Fetched,
    Extracting,
    Extracted,
    Validating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Fetching => "fetching",
            JobStatus::Fetched => "fetched",
            JobStatus::Extracting => "extracting",
            JobStatus::Extracted => "extracted",
            JobStatus::Validating => "validating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Fetching,
    Extracting,
    Storing,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Fetching => "fetching",
            FailureStage::Extracting => "extracting",
            FailureStage::Storing => "storing",
        }
    }

    /// Progress percent reported when a job dies in this stage
    pub fn progress_percent(&self) -> u8 {
        match self {
            FailureStage::Fetching => 20,
            FailureStage::Extracting => 60,
            FailureStage::Storing => 90,
        }
    }
}

/// One run of the pipeline for one URL through one scraper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Id with `job_` prefix + 12 hex
    pub job_id: String,

    pub scraper_id: String,

    pub url: String,

    pub status: JobStatus,

    #[serde(default)]
    pub options: ScrapeOptions,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<FailureStage>,
}

// ============================================================================
// Monitor
// ============================================================================

/// A (scraper, url) pair scheduled for periodic refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    /// `{scraper_id}_{hash_url(url)}`
    pub monitor_id: String,

    pub scraper_id: String,

    pub url: String,

    pub schedule_type: ScheduleType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,

    /// Missing or unparsable `next_run` makes the scheduler skip the row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,

    #[serde(default)]
    pub run_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_job_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Side-table rows
// ============================================================================

/// `job_payloads/<job_id>`: written by the gateway/scheduler, read by Fetch
///
/// The event bus caps message size, so the schema travels through the state
/// store instead of the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub schema: Schema,
    pub scraper_id: String,
}

/// `fetch_payloads/<job_id>`: written by Fetch, read by Extract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPayload {
    pub markdown: String,
    pub schema: Schema,
    #[serde(default)]
    pub metadata: Value,
}

/// `extraction_payloads/<job_id>`: written by Extract (or the Fetch
/// cache-hit short circuit), read by Store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionPayload {
    pub data: Value,
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Value,
    #[serde(default)]
    pub metadata: Value,
}

// ============================================================================
// Extraction record
// ============================================================================

/// `extractions/<job_id>`: the terminal result row clients read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub job_id: String,

    pub status: JobStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraper_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,

    #[serde(default)]
    pub cached: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<FailureStage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_untagged_roundtrip() {
        let prompt: Schema = serde_json::from_value(json!("extract the title")).unwrap();
        assert_eq!(prompt, Schema::Prompt("extract the title".to_string()));

        let structured: Schema =
            serde_json::from_value(json!({"type": "object"})).unwrap();
        assert!(structured.is_structured());

        let back = serde_json::to_value(&structured).unwrap();
        assert_eq!(back, json!({"type": "object"}));
    }

    #[test]
    fn test_schema_canonical_prompt_is_verbatim() {
        let schema = Schema::Prompt("Extract name and price".to_string());
        assert_eq!(schema.canonical(), "Extract name and price");
    }

    #[test]
    fn test_job_status_ordering_and_terminal() {
        assert!(JobStatus::Queued < JobStatus::Fetching);
        assert!(JobStatus::Fetching < JobStatus::Completed);
        assert!(!JobStatus::Extracting.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_value(JobStatus::Fetching).unwrap(),
            json!("fetching")
        );
        let status: JobStatus = serde_json::from_value(json!("completed")).unwrap();
        assert_eq!(status, JobStatus::Completed);
    }

    #[test]
    fn test_failure_stage_progress_percent() {
        assert_eq!(FailureStage::Fetching.progress_percent(), 20);
        assert_eq!(FailureStage::Extracting.progress_percent(), 60);
        assert_eq!(FailureStage::Storing.progress_percent(), 90);
    }

    #[test]
    fn test_scrape_options_defaults() {
        let options: ScrapeOptions = serde_json::from_value(json!({})).unwrap();
        assert!(options.use_cache);
        assert_eq!(options.wait_for, 2000);
        assert_eq!(options.timeout, 30_000);
        assert!(!options.use_simple_scraper);
        assert!(options.model.is_none());
    }

    #[test]
    fn test_schedule_spec_untagged() {
        let minutes: ScheduleSpec = serde_json::from_value(json!(15)).unwrap();
        assert_eq!(minutes, ScheduleSpec::Minutes(15));

        let cron: ScheduleSpec = serde_json::from_value(json!("0 */2 * * *")).unwrap();
        assert_eq!(cron, ScheduleSpec::Cron("0 */2 * * *".to_string()));
    }

    #[test]
    fn test_monitor_tolerates_missing_next_run() {
        let monitor: Monitor = serde_json::from_value(json!({
            "monitor_id": "scr_abc_def",
            "scraper_id": "scr_abc",
            "url": "https://example.com",
            "schedule_type": "interval",
            "interval_minutes": 30,
            "active": true,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(monitor.next_run.is_none());
        assert_eq!(monitor.run_count, 0);
    }
}
