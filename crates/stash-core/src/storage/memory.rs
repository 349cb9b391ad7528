//! In-memory key-value store using DashMap

use crate::ports::{KvStore, StoreFactory};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Key-value store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read a value without going through the async interface
    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.snapshot(key))
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }
}

/// Hands out one `MemoryStore` per namespace
#[derive(Default)]
pub struct MemoryStoreFactory {
    stores: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store for a namespace, if it has been opened
    pub fn store(&self, namespace: &str) -> Option<Arc<MemoryStore>> {
        self.stores.get(namespace).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl StoreFactory for MemoryStoreFactory {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn KvStore>> {
        let store = self
            .stores
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone();
        Ok(store)
    }
}
