//! Storage traits for persistence

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Asynchronous key-value store backing one namespace
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Opens the key-value store for a namespace
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn KvStore>>;
}
