//! Namespaced key-value state store
//!
//! The pipeline's only shared mutable resource. Stages, the gateway, and
//! the scheduler all talk to a `State` handle, which wraps a pluggable
//! backend (`MemoryStateStore` for tests and single-process runs,
//! `RedisStateStore` for shared deployments).
//!
//! Some backends wrap stored values in a `{"data": ...}` envelope; the
//! unwrap is centralized in [`unwrap_envelope`] so no caller hand-rolls it.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStateStore;
pub use self::redis::{RedisConfig, RedisStateStore};

/// State-store namespaces
pub mod ns {
    pub const SCRAPERS: &str = "scrapers";
    pub const JOBS: &str = "jobs";
    pub const EXTRACTIONS: &str = "extractions";
    pub const MONITORS: &str = "monitors";
    pub const CONTENT_CACHE: &str = "content_cache";
    pub const EXTRACTION_CACHE: &str = "extraction_cache";
    pub const JOB_PAYLOADS: &str = "job_payloads";
    pub const FETCH_PAYLOADS: &str = "fetch_payloads";
    pub const EXTRACTION_PAYLOADS: &str = "extraction_payloads";
}

/// Raw backend interface: whole-value reads and writes per (group, key)
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_raw(&self, group: &str, key: &str) -> Result<Option<Value>>;

    async fn set_raw(&self, group: &str, key: &str, value: Value) -> Result<()>;

    async fn delete(&self, group: &str, key: &str) -> Result<()>;

    /// All values in a group, order unspecified
    async fn list_group(&self, group: &str) -> Result<Vec<Value>>;
}

/// Strip the optional `{"data": ...}` wrapper some backends add
///
/// A value is treated as wrapped only when it is an object with a non-null
/// `data` member; anything else is returned as-is.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(inner) if !inner.is_null() => inner,
            Some(inner) => {
                map.insert("data".to_string(), inner);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Typed handle over a state-store backend
#[derive(Clone)]
pub struct State {
    inner: Arc<dyn StateStore>,
}

impl State {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self { inner }
    }

    /// In-memory state, for tests and single-process serving
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStateStore::new()))
    }

    /// Read and decode a value, transparently unwrapping the envelope
    pub async fn get<T: DeserializeOwned>(&self, group: &str, key: &str) -> Result<Option<T>> {
        match self.inner.get_raw(group, key).await? {
            Some(value) => {
                let decoded = serde_json::from_value(unwrap_envelope(value))?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }

    /// Encode and write a value (whole-value overwrite)
    pub async fn set<T: Serialize>(&self, group: &str, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_value(value)?;
        self.inner.set_raw(group, key, encoded).await
    }

    pub async fn delete(&self, group: &str, key: &str) -> Result<()> {
        self.inner.delete(group, key).await
    }

    /// Decode every value in a group, skipping rows that no longer decode
    pub async fn list<T: DeserializeOwned>(&self, group: &str) -> Result<Vec<T>> {
        let raw = self.inner.list_group(group).await?;
        let mut decoded = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value(unwrap_envelope(value)) {
                Ok(item) => decoded.push(item),
                Err(e) => warn!(group, error = %e, "Skipping undecodable state row"),
            }
        }
        Ok(decoded)
    }
}
