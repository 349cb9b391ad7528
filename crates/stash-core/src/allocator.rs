//! Sequential identifier allocation
//!
//! Counters for every table of a namespace live in one map persisted under
//! [`PK_MAP_KEY`]. The map is loaded once per allocator; concurrent callers
//! that arrive before the load completes wait on the same load instead of
//! each starting their own.

use crate::flush::FlushEngine;
use crate::ports::KvStore;
use crate::{parse_id, RecordId, Result, StashError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Reserved key holding the per-table counter map
pub const PK_MAP_KEY: &str = "pk_map";

type Counters = BTreeMap<String, RecordId>;

pub struct IdAllocator {
    store: Arc<dyn KvStore>,
    flush: Arc<FlushEngine>,
    counters: OnceCell<Mutex<Counters>>,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn KvStore>, flush: Arc<FlushEngine>) -> Self {
        Self {
            store,
            flush,
            counters: OnceCell::new(),
        }
    }

    /// Allocate the next identifier for `table`.
    ///
    /// Identifiers start at 1 and are never handed out twice for a table.
    /// The counter map is persisted through the flush engine before
    /// returning; the writer serializes the map at write time, so the stored
    /// counters always cover every identifier handed out before the write. A
    /// persistence failure is reported to the caller whose request performed
    /// the write.
    pub async fn allocate(&self, table: &str) -> Result<RecordId> {
        let counters = self.counters().await?;
        lock(counters).entry(table.to_string()).or_insert(0);

        tokio::task::yield_now().await;

        let id = {
            let mut counters = lock(counters);
            let counter = counters.entry(table.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        self.flush
            .flush_with(PK_MAP_KEY, || async move {
                let value = snapshot(counters)?;
                self.store.put(PK_MAP_KEY, value).await
            })
            .await?;

        debug!("Allocated id {} for table {}", id, table);
        Ok(id)
    }

    /// Last identifier allocated for `table`, or 0
    pub async fn peek(&self, table: &str) -> Result<RecordId> {
        let counters = self.counters().await?;
        let last = lock(counters).get(table).copied().unwrap_or(0);
        Ok(last)
    }

    async fn counters(&self) -> Result<&Mutex<Counters>> {
        self.counters
            .get_or_try_init(|| async {
                let stored = self.store.get(PK_MAP_KEY).await?;
                let counters = parse_counters(stored)?;
                info!("Loaded id counters for {} tables", counters.len());
                Ok::<_, StashError>(Mutex::new(counters))
            })
            .await
    }
}

fn lock(counters: &Mutex<Counters>) -> MutexGuard<'_, Counters> {
    counters.lock().unwrap_or_else(|e| e.into_inner())
}

fn snapshot(counters: &Mutex<Counters>) -> Result<Value> {
    Ok(serde_json::to_value(&*lock(counters))?)
}

fn parse_counters(stored: Option<Value>) -> Result<Counters> {
    let map = match stored {
        None | Some(Value::Null) => return Ok(Counters::new()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(StashError::InvalidRecord(format!(
                "{} must be an object, found {}",
                PK_MAP_KEY, other
            )))
        }
    };

    map.into_iter()
        .map(|(table, value)| match parse_id(&value) {
            Some(last) => Ok((table, last)),
            None => Err(StashError::InvalidRecord(format!(
                "counter for table {} is not a non-negative integer: {}",
                table, value
            ))),
        })
        .collect()
}
