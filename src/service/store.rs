use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{DEFAULT_STORE_NAME, Service, Store};

/// Process-local key-value store. Contents die with the process.
pub struct InMemoryStore {
    name: String,
    entries: RwLock<HashMap<String, Value>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::named(DEFAULT_STORE_NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Service for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_store(self: Arc<Self>) -> Option<Arc<dyn Store>> {
        Some(self)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = InMemoryStore::new();
        store.set("k", json!(1)).await.unwrap();
        store.set("k", json!({"visits": 2})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"visits": 2})));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn remove_then_get() {
        let store = InMemoryStore::new();
        store.set("k", json!("v")).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn keys_filter_by_prefix() {
        let store = InMemoryStore::new();
        store.set("session:a", json!(1)).await.unwrap();
        store.set("session:b", json!(2)).await.unwrap();
        store.set("other", json!(3)).await.unwrap();

        let mut keys = store.keys("session:").await.unwrap();
        keys.sort();
        assert_eq!(keys, ["session:a", "session:b"]);
    }

    #[test]
    fn exposes_store_capability() {
        let store: Arc<dyn Service> = Arc::new(InMemoryStore::named("cache"));
        assert_eq!(store.name(), "cache");
        assert!(store.as_store().is_some());
    }
}
