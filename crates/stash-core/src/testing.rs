//! Instrumented store for exercising coalescing and failure paths

use crate::ports::KvStore;
use crate::storage::MemoryStore;
use crate::{Result, StashError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Memory-backed store that records every physical put
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    puts: Mutex<Vec<(String, Value)>>,
    gets: AtomicUsize,
    fail_puts: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value without recording it as a put
    pub async fn seed(&self, key: &str, value: Value) -> Result<()> {
        self.inner.put(key, value).await
    }

    /// Make every subsequent put fail (or succeed again)
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Values written under `key`, oldest first
    pub fn puts(&self, key: &str) -> Vec<Value> {
        self.puts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn put_count(&self, key: &str) -> usize {
        self.puts(key).len()
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Current stored value for `key`
    pub fn stored(&self, key: &str) -> Option<Value> {
        self.inner.snapshot(key)
    }
}

#[async_trait]
impl KvStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StashError::Storage(format!("put rejected for {}", key)));
        }
        self.puts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.to_string(), value.clone()));
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}
