//! Common utilities and helpers

pub mod hash;
pub mod retry;

pub use hash::{
    canonical_json, extraction_cache_key, generate_job_id, generate_monitor_id,
    generate_scraper_id, hash_url, hash_url_full,
};
pub use retry::{with_retry, with_retry_if, RetryConfig};
