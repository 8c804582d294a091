//! Redis-backed state-store backend
//!
//! Keys are `{prefix}:{group}:{key}`, values are JSON strings. The cache
//! groups get a TTL so eviction rides Redis expiry; every other group is
//! persistent for the life of the key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde_json::Value;
use tracing::warn;

use super::{ns, StateStore};

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g. redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Key prefix for namespacing
    pub key_prefix: String,

    /// Content-cache TTL in seconds (default: 24 hours)
    pub content_cache_ttl: u64,

    /// Extraction-cache TTL in seconds (default: 7 days)
    pub extraction_cache_ttl: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "pagelift".to_string(),
            content_cache_ttl: 86_400,
            extraction_cache_ttl: 604_800,
        }
    }
}

impl RedisConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            pool_size: std::env::var("REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            key_prefix: std::env::var("STATE_KEY_PREFIX")
                .unwrap_or_else(|_| "pagelift".to_string()),
            content_cache_ttl: std::env::var("CONTENT_CACHE_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(86_400),
            extraction_cache_ttl: std::env::var("EXTRACTION_CACHE_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(604_800),
        }
    }
}

/// Redis state-store client
pub struct RedisStateStore {
    pool: Pool,
    config: RedisConfig,
}

impl RedisStateStore {
    /// Connect and verify with a PING
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")?;

        let mut conn = pool.get().await.context("Failed to get Redis connection")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to ping Redis")?;

        tracing::info!(url = %config.url, "Connected to Redis state store");

        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    /// Connect, returning None if Redis is unavailable
    pub async fn try_new(config: &RedisConfig) -> Option<Self> {
        match Self::new(config).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to in-memory state");
                None
            }
        }
    }

    fn full_key(&self, group: &str, key: &str) -> String {
        format!("{}:{}:{}", self.config.key_prefix, group, key)
    }

    /// TTL policy per group; only the two caches expire
    fn ttl_for(&self, group: &str) -> Option<u64> {
        match group {
            ns::CONTENT_CACHE => Some(self.config.content_cache_ttl),
            ns::EXTRACTION_CACHE => Some(self.config.extraction_cache_ttl),
            _ => None,
        }
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get_raw(&self, group: &str, key: &str) -> Result<Option<Value>> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;

        let raw: Option<String> = conn
            .get(self.full_key(group, key))
            .await
            .context("Failed to read state value")?;

        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Failed to decode state value")?,
            )),
            None => Ok(None),
        }
    }

    async fn set_raw(&self, group: &str, key: &str, value: Value) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        let json = serde_json::to_string(&value).context("Failed to encode state value")?;
        let full_key = self.full_key(group, key);

        match self.ttl_for(group) {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(full_key, json, ttl)
                .await
                .context("Failed to write state value")?,
            None => conn
                .set::<_, _, ()>(full_key, json)
                .await
                .context("Failed to write state value")?,
        }

        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        let _: () = conn
            .del(self.full_key(group, key))
            .await
            .context("Failed to delete state value")?;
        Ok(())
    }

    async fn list_group(&self, group: &str) -> Result<Vec<Value>> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;

        let pattern = format!("{}:{}:*", self.config.key_prefix, group);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut *conn)
            .await
            .context("Failed to scan group keys")?;

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut *conn)
            .await
            .context("Failed to read group values")?;

        let mut values = Vec::with_capacity(raw.len());
        for entry in raw.into_iter().flatten() {
            match serde_json::from_str(&entry) {
                Ok(value) => values.push(value),
                Err(e) => warn!(group, error = %e, "Skipping undecodable Redis value"),
            }
        }

        Ok(values)
    }
}
