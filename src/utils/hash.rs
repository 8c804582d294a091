//! Hashing and identifier utilities
//!
//! Pure functions for cache keys, monitor ids, and job/scraper ids.
//! No side effects, no I/O.

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Schema;

/// Hex-encode the SHA-256 of a string
fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash a URL to a short consistent key
///
/// Returns the first 12 characters of the SHA-256 hex digest. Used for
/// monitor ids and for the scheduler's per-url message groups.
pub fn hash_url(url: &str) -> String {
    sha256_hex(url)[..12].to_string()
}

/// Full SHA-256 hex digest of a URL. Content-cache key.
pub fn hash_url_full(url: &str) -> String {
    sha256_hex(url)
}

/// Extraction-cache key for a (url, schema) pair
///
/// Key = first 16 hex of SHA-256(`url + "|" + canonical(schema)`). Two
/// structured schemas that differ only in key ordering produce the same key.
pub fn extraction_cache_key(url: &str, schema: &Schema) -> String {
    let combined = format!("{}|{}", url, schema.canonical());
    sha256_hex(&combined)[..16].to_string()
}

/// Serialize a JSON value with object keys recursively sorted
///
/// This is the canonical form used for cache keys: insertion order of a
/// schema's keys must not change the key.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        other => other.to_string(),
    }
}

fn uuid_hex12() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Generate a unique job id with `job_` prefix, e.g. `job_a1b2c3d4e5f6`
pub fn generate_job_id() -> String {
    format!("job_{}", uuid_hex12())
}

/// Generate a unique scraper id with `scr_` prefix, e.g. `scr_a1b2c3d4e5f6`
pub fn generate_scraper_id() -> String {
    format!("scr_{}", uuid_hex12())
}

/// Monitor id for a (scraper, url) pair
///
/// Format: `{scraper_id}_{hash_url(url)}`. Deterministic, so repeated runs
/// for the same pair address the same monitor row.
pub fn generate_monitor_id(scraper_id: &str, url: &str) -> String {
    format!("{}_{}", scraper_id, hash_url(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_url_shape() {
        let hash = hash_url("https://example.com/page");
        assert_eq!(hash.len(), 12);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_url("https://example.com/page"));
        assert_ne!(hash, hash_url("https://example.com/other"));
    }

    #[test]
    fn test_hash_url_full_is_prefix_consistent() {
        let url = "https://example.com/page";
        assert_eq!(hash_url_full(url).len(), 64);
        assert!(hash_url_full(url).starts_with(&hash_url(url)));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"outer": {"y": [{"b": 1, "a": 2}], "x": null}});
        let b = json!({"outer": {"x": null, "y": [{"a": 2, "b": 1}]}});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_extraction_cache_key_ignores_key_order() {
        let url = "https://example.com";
        let s1 = Schema::Structured(json!({"b": 1, "a": 2}));
        let s2 = Schema::Structured(json!({"a": 2, "b": 1}));
        assert_eq!(extraction_cache_key(url, &s1), extraction_cache_key(url, &s2));
        assert_eq!(extraction_cache_key(url, &s1).len(), 16);
    }

    #[test]
    fn test_extraction_cache_key_differs_per_schema() {
        let url = "https://example.com";
        let s1 = Schema::Structured(json!({"a": 1}));
        let s2 = Schema::Structured(json!({"a": 2}));
        let s3 = Schema::Prompt("extract the title".to_string());
        assert_ne!(extraction_cache_key(url, &s1), extraction_cache_key(url, &s2));
        assert_ne!(extraction_cache_key(url, &s1), extraction_cache_key(url, &s3));
    }

    #[test]
    fn test_generate_ids() {
        let job = generate_job_id();
        assert!(job.starts_with("job_"));
        assert_eq!(job.len(), 16);

        let scr = generate_scraper_id();
        assert!(scr.starts_with("scr_"));
        assert_eq!(scr.len(), 16);

        assert_ne!(generate_job_id(), generate_job_id());
    }

    #[test]
    fn test_generate_monitor_id() {
        let id = generate_monitor_id("scr_abc123def456", "https://example.com");
        assert_eq!(
            id,
            format!("scr_abc123def456_{}", hash_url("https://example.com"))
        );
        assert_eq!(id, generate_monitor_id("scr_abc123def456", "https://example.com"));
    }
}
