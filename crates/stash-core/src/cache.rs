//! Process-lifetime table cache
//!
//! A table is read from the store the first time it is touched and from then
//! on the in-memory copy is authoritative. Changes made to the backing store
//! by anyone else while the process runs are never observed.

use crate::ports::KvStore;
use crate::{Record, RecordId, Result, StashError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::OnceCell;
use tracing::info;

/// Lazily loaded cache for one table
pub struct TableCache {
    table: String,
    primary_key: String,
    store: Arc<dyn KvStore>,
    rows: OnceCell<CachedRows>,
}

/// Loaded rows of a table, keyed and ordered by identifier.
///
/// All operations are synchronous; persistence happens separately through a
/// table flush.
#[derive(Default)]
pub struct CachedRows {
    rows: RwLock<BTreeMap<RecordId, Record>>,
}

impl TableCache {
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            store,
            rows: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.rows.initialized()
    }

    /// The cached rows, loading them on first use.
    ///
    /// Concurrent first calls share a single load.
    pub async fn get_cache(&self) -> Result<&CachedRows> {
        self.rows
            .get_or_try_init(|| async {
                let stored = self.store.get(&self.table).await?;
                let rows = self.parse_rows(stored)?;
                info!("Loaded {} rows for table {}", rows.len(), self.table);
                Ok::<_, StashError>(CachedRows {
                    rows: RwLock::new(rows),
                })
            })
            .await
    }

    fn parse_rows(&self, stored: Option<Value>) -> Result<BTreeMap<RecordId, Record>> {
        let items = match stored {
            None | Some(Value::Null) => return Ok(BTreeMap::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(StashError::InvalidRecord(format!(
                    "table {} must be stored as a list, found {}",
                    self.table, other
                )))
            }
        };

        let mut rows = BTreeMap::new();
        for item in items {
            let record = Record::from_value(item).ok_or_else(|| {
                StashError::InvalidRecord(format!("table {} holds a non-object row", self.table))
            })?;
            let id = record.id(&self.primary_key).ok_or_else(|| {
                StashError::InvalidRecord(format!(
                    "table {} holds a row without an integer {}",
                    self.table, self.primary_key
                ))
            })?;
            rows.insert(id, record);
        }
        Ok(rows)
    }
}

impl CachedRows {
    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.read().get(&id).cloned()
    }

    pub fn put(&self, id: RecordId, record: Record) {
        self.write().insert(id, record);
    }

    pub fn remove(&self, id: RecordId) -> Option<Record> {
        self.write().remove(&id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Every row, ascending by identifier
    pub fn snapshot(&self) -> Vec<Record> {
        self.read().values().cloned().collect()
    }

    /// The persisted form of the table: a list of rows sorted by identifier
    pub fn to_persisted(&self) -> Value {
        Value::Array(self.read().values().cloned().map(Record::into_value).collect())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<RecordId, Record>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<RecordId, Record>> {
        self.rows.write().unwrap_or_else(|e| e.into_inner())
    }
}
