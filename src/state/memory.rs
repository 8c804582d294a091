//! In-memory state-store backend
//!
//! Backs tests and single-process serving. Whole-value writes and
//! last-write-wins reads, matching the atomicity the pipeline assumes of
//! any backend.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::StateStore;

/// HashMap-of-HashMaps store behind an async RwLock
#[derive(Default)]
pub struct MemoryStateStore {
    groups: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held in a group
    pub async fn group_len(&self, group: &str) -> usize {
        self.groups
            .read()
            .await
            .get(group)
            .map(|g| g.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_raw(&self, group: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .groups
            .read()
            .await
            .get(group)
            .and_then(|g| g.get(key))
            .cloned())
    }

    async fn set_raw(&self, group: &str, key: &str, value: Value) -> Result<()> {
        self.groups
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<()> {
        if let Some(g) = self.groups.write().await.get_mut(group) {
            g.remove(key);
        }
        Ok(())
    }

    async fn list_group(&self, group: &str) -> Result<Vec<Value>> {
        Ok(self
            .groups
            .read()
            .await
            .get(group)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStateStore::new();

        store.set_raw("jobs", "a", json!(1)).await.unwrap();
        assert_eq!(store.get_raw("jobs", "a").await.unwrap(), Some(json!(1)));

        // Whole-value overwrite
        store.set_raw("jobs", "a", json!(2)).await.unwrap();
        assert_eq!(store.get_raw("jobs", "a").await.unwrap(), Some(json!(2)));

        store.delete("jobs", "a").await.unwrap();
        assert_eq!(store.get_raw("jobs", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let store = MemoryStateStore::new();
        store.set_raw("jobs", "k", json!("job")).await.unwrap();
        store.set_raw("monitors", "k", json!("monitor")).await.unwrap();

        assert_eq!(
            store.get_raw("jobs", "k").await.unwrap(),
            Some(json!("job"))
        );
        assert_eq!(
            store.get_raw("monitors", "k").await.unwrap(),
            Some(json!("monitor"))
        );
    }

    #[tokio::test]
    async fn test_list_group() {
        let store = MemoryStateStore::new();
        assert!(store.list_group("monitors").await.unwrap().is_empty());

        store.set_raw("monitors", "a", json!({"id": "a"})).await.unwrap();
        store.set_raw("monitors", "b", json!({"id": "b"})).await.unwrap();

        let values = store.list_group("monitors").await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(store.group_len("monitors").await, 2);
    }
}
