//! Per-table context
//!
//! A `Table` bundles everything the store keeps for one table: its cache,
//! its query queue and its class-wide listeners. Saves and deletes change the
//! cache immediately and then request a coalesced flush of the whole table;
//! the persisted list is rebuilt from the cache when the flush fires.

use crate::allocator::IdAllocator;
use crate::cache::TableCache;
use crate::events::EventTarget;
use crate::flush::{FlushEngine, FlushOutcome};
use crate::ports::KvStore;
use crate::query::QuerySerializer;
use crate::{EventKind, ModelEvent, Record, RecordId, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Table {
    name: String,
    primary_key: String,
    store: Arc<dyn KvStore>,
    flush: Arc<FlushEngine>,
    ids: Arc<IdAllocator>,
    cache: TableCache,
    queries: QuerySerializer,
    events: EventTarget,
}

impl Table {
    pub(crate) fn new(
        name: &str,
        primary_key: &str,
        store: Arc<dyn KvStore>,
        flush: Arc<FlushEngine>,
        ids: Arc<IdAllocator>,
    ) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            cache: TableCache::new(name, primary_key, store.clone()),
            store,
            flush,
            ids,
            queries: QuerySerializer::new(),
            events: EventTarget::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Listeners notified for every record of this table
    pub fn events(&self) -> &EventTarget {
        &self.events
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    pub fn queries(&self) -> &QuerySerializer {
        &self.queries
    }

    /// Save a record, allocating an identifier if it has none.
    ///
    /// The record is visible to reads as soon as this returns; it is written
    /// to the store once concurrent saves and deletes on the table settle.
    pub async fn save(&self, record: Record) -> Result<Record> {
        self.save_with(record, None).await
    }

    pub(crate) async fn save_with(
        &self,
        mut record: Record,
        instance_events: Option<&EventTarget>,
    ) -> Result<Record> {
        let id = match record.id(&self.primary_key) {
            Some(id) => id,
            None => {
                let id = self.ids.allocate(&self.name).await?;
                record.set_id(&self.primary_key, id);
                id
            }
        };

        let rows = self.cache.get_cache().await?;
        rows.put(id, record.clone());
        debug!("Cached {} {}", self.name, id);

        self.announce(EventKind::Save, id, &record, instance_events);

        self.flush().await?;
        Ok(record)
    }

    pub async fn get_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        let rows = self.cache.get_cache().await?;
        let record = rows.get(id);
        if record.is_none() {
            warn!("{} {} not found", self.name, id);
        }
        Ok(record)
    }

    /// Remove a record; returns it if it existed.
    ///
    /// The table is flushed either way.
    pub async fn delete(&self, id: RecordId) -> Result<Option<Record>> {
        self.delete_with(id, None).await
    }

    pub(crate) async fn delete_with(
        &self,
        id: RecordId,
        instance_events: Option<&EventTarget>,
    ) -> Result<Option<Record>> {
        let rows = self.cache.get_cache().await?;
        let removed = rows.remove(id);

        if let Some(record) = &removed {
            self.announce(EventKind::Delete, id, record, instance_events);
        }

        self.flush().await?;
        Ok(removed)
    }

    /// Every record, ascending by identifier
    pub fn all(&self) -> impl Future<Output = Result<Vec<Record>>> + '_ {
        self.query(|_| true)
    }

    /// Records matching `filter`, ascending by identifier.
    ///
    /// The query takes its place in the table's queue when called, so queries
    /// on the same table resolve in the order they were issued regardless of
    /// when they are first polled.
    pub fn query<'a, F>(&'a self, filter: F) -> impl Future<Output = Result<Vec<Record>>> + 'a
    where
        F: Fn(&Record) -> bool + 'a,
    {
        let mut ticket = self.queries.enqueue();
        async move {
            ticket.turn().await;

            let rows = self.cache.get_cache().await?;
            let records = rows.snapshot().into_iter().filter(|r| filter(r)).collect();

            drop(ticket);
            Ok(records)
        }
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.cache.get_cache().await?.len())
    }

    /// Request a coalesced write of the whole table
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let key = format!("table:{}", self.name);
        self.flush
            .flush_with(&key, || async move {
                let rows = self.cache.get_cache().await?;
                self.store.put(&self.name, rows.to_persisted()).await
            })
            .await
    }

    fn announce(
        &self,
        kind: EventKind,
        id: RecordId,
        record: &Record,
        instance_events: Option<&EventTarget>,
    ) {
        let event = ModelEvent::new(kind, &self.name, id, record.clone());
        self.events.fire(&event);
        if let Some(instance_events) = instance_events {
            instance_events.fire(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStore;
    use crate::Database;
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::Mutex;

    fn database() -> (Arc<RecordingStore>, Database) {
        let store = Arc::new(RecordingStore::new());
        let db = Database::new("test", store.clone());
        (store, db)
    }

    #[tokio::test]
    async fn test_save_assigns_id_and_reads_back() {
        let (store, db) = database();
        let users = db.table("users").unwrap();

        let saved = users.save(Record::new().with("name", "a")).await.unwrap();
        assert_eq!(saved.id("id"), Some(1));

        let all = users.all().await.unwrap();
        assert_eq!(all, vec![Record::new().with("name", "a").with("id", 1)]);
        assert_eq!(store.stored("users"), Some(json!([{ "name": "a", "id": 1 }])));
    }

    #[tokio::test]
    async fn test_delete_removes() {
        let (store, db) = database();
        let users = db.table("users").unwrap();
        users.save(Record::new().with("name", "a")).await.unwrap();

        let removed = users.delete(1).await.unwrap();
        assert!(removed.is_some());

        assert_eq!(users.get_by_id(1).await.unwrap(), None);
        assert!(users.all().await.unwrap().is_empty());
        assert_eq!(store.stored("users"), Some(json!([])));

        assert_eq!(users.delete(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_saves_flush_once() {
        let (store, db) = database();
        let users = db.table("users").unwrap();

        let saved = join_all(
            ["a", "b"].map(|name| users.save(Record::new().with("name", name))),
        )
        .await;
        let mut ids: Vec<_> = saved.into_iter().map(|r| r.unwrap().id("id").unwrap()).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);

        let writes = store.puts("users");
        assert_eq!(writes.len(), 1);
        let persisted_ids: Vec<_> = writes[0]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["id"].as_u64().unwrap())
            .collect();
        assert_eq!(persisted_ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_query_sorts_and_filters() {
        let (_store, db) = database();
        let orders = db.table("orders").unwrap();

        for (id, total) in [(30, 5), (4, 50), (17, 12)] {
            orders
                .save(Record::new().with("id", id).with("total", total))
                .await
                .unwrap();
        }

        let ids: Vec<_> = orders
            .all()
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r.id("id"))
            .collect();
        assert_eq!(ids, vec![4, 17, 30]);

        let big = orders
            .query(|r| r.get("total").and_then(|t| t.as_u64()).unwrap_or(0) > 10)
            .await
            .unwrap();
        let big_ids: Vec<_> = big.iter().filter_map(|r| r.id("id")).collect();
        assert_eq!(big_ids, vec![4, 17]);
    }

    #[tokio::test]
    async fn test_concurrent_queries_resolve_in_submission_order() {
        let (_store, db) = database();
        let users = db.table("users").unwrap();
        users.save(Record::new().with("name", "a")).await.unwrap();

        let order = Mutex::new(Vec::new());
        join_all((1..=4).map(|n| {
            let users = &users;
            let order = &order;
            async move {
                users.all().await.unwrap();
                order.lock().unwrap().push(n);
            }
        }))
        .await;

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_waiting_queries_keep_submission_order() {
        let (_store, db) = database();
        let users = db.table("users").unwrap();
        users.save(Record::new().with("name", "a")).await.unwrap();

        let blocker = users.queries().enqueue();
        let mut first = tokio_test::task::spawn(users.all());
        let mut second = tokio_test::task::spawn(users.query(|r| r.id("id") == Some(1)));
        tokio_test::assert_pending!(first.poll());
        tokio_test::assert_pending!(second.poll());

        // A record saved while the queries wait is visible to both.
        users.save(Record::new().with("name", "b")).await.unwrap();
        drop(blocker);

        tokio_test::assert_pending!(second.poll());
        let first = tokio_test::assert_ready!(first.poll()).unwrap();
        let second = tokio_test::assert_ready!(second.poll()).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_queries_are_ordered_by_call_not_first_poll() {
        let (_store, db) = database();
        let users = db.table("users").unwrap();
        users.save(Record::new().with("name", "a")).await.unwrap();

        let mut first = tokio_test::task::spawn(users.all());
        let mut second = tokio_test::task::spawn(users.all());
        assert_eq!(users.queries().len(), 2);

        tokio_test::assert_pending!(second.poll());
        let first = tokio_test::assert_ready!(first.poll()).unwrap();
        assert!(second.is_woken());
        let second = tokio_test::assert_ready!(second.poll()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(users.queries().is_empty());
    }

    #[tokio::test]
    async fn test_save_announces_event() {
        let (_store, db) = database();
        let users = db.table("users").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        users.events().on(EventKind::Save, move |event| {
            sink.lock().unwrap().push((event.table.clone(), event.id));
            true
        });
        // A listener's answer does not affect the save.
        users.events().on(EventKind::Save, |_| false);

        users.save(Record::new().with("name", "a")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("users".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_flush_failure_reaches_caller() {
        let (store, db) = database();
        let users = db.table("users").unwrap();
        users.save(Record::new().with("name", "a")).await.unwrap();

        store.fail_puts(true);
        assert!(users.save(Record::new().with("id", 1).with("name", "b")).await.is_err());

        // The cache keeps the change even though it was not persisted.
        let cached = users.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(cached.get("name"), Some(&json!("b")));
    }
}
