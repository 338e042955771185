//! In-process state store
//!
//! Backed by a `DashMap`. Nothing survives the process, so this is used by
//! tests and by callers that persist elsewhere.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use super::{StateStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, Value>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored value, bypassing normalization
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Write a raw value, bypassing normalization
    pub fn insert_raw(&self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }
}

impl StateStore for MemoryStateStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        Box::pin(async move { Ok(self.peek(key)) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.entries.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.entries.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_basic_operations() -> Result<(), StoreError> {
        let store = MemoryStateStore::new();
        assert_eq!(store.get("missing").await?, None);

        store.set("queue_runtime", json!({ "status": "idle" })).await?;
        assert_eq!(store.get("queue_runtime").await?, Some(json!({ "status": "idle" })));

        store.set("queue_runtime", json!({ "status": "running" })).await?;
        assert_eq!(store.peek("queue_runtime"), Some(json!({ "status": "running" })));

        store.remove("queue_runtime").await?;
        assert_eq!(store.get("queue_runtime").await?, None);
        Ok(())
    }
}
