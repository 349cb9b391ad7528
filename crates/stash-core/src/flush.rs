//! Coalescing flush engine
//!
//! Collapses concurrent requests to persist the same key into one physical
//! write. Every request registers itself, yields for one scheduling tick so
//! that concurrent requests can register too, then deregisters. The request
//! that brings the pending count back to zero performs the write, carrying
//! the most recently registered value. All other requests of the batch wait
//! for that write to settle and return `FlushOutcome::Coalesced` without
//! touching the store.
//!
//! If the writer is dropped before its write settles, a waiting request of
//! the same batch takes the write over.
//!
//! Physical writes for a key go through a per-key gate. A drained batch whose
//! newest registration is older than the last one written is dropped, so a
//! slow writer can never overwrite a newer snapshot.

use crate::ports::KvStore;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tracing::{debug, info};

/// What a flush request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// This request performed the physical write
    Written,
    /// Another request of the same batch (or a newer batch) owns the write
    Coalesced,
}

/// A batch whose pending count reached zero, ready to be written
struct Drained {
    seq: u64,
    value: Option<Value>,
    gate: Arc<AsyncMutex<u64>>,
}

#[derive(Default)]
enum BatchState {
    #[default]
    Open,
    /// The writer went away; the first waiter to notice takes the write
    Orphaned(Drained),
    Done,
}

/// Shared by every request registered in the same batch
#[derive(Default)]
struct BatchSignal {
    state: Mutex<BatchState>,
    notify: Notify,
}

impl BatchSignal {
    fn settle(&self, state: BatchState) {
        *lock(&self.state) = state;
        self.notify.notify_waiters();
    }

    /// Wait for the batch write to settle. Returns the batch if its writer
    /// was dropped and this request has to write it instead.
    async fn wait(&self) -> Option<Drained> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = lock(&self.state);
                match std::mem::take(&mut *state) {
                    BatchState::Orphaned(drained) => return Some(drained),
                    BatchState::Done => {
                        *state = BatchState::Done;
                        return None;
                    }
                    BatchState::Open => {}
                }
            }
            notified.await;
        }
    }
}

#[derive(Default)]
struct PendingSlot {
    in_flight: usize,
    /// Sequence number of the newest registration
    last_seq: u64,
    /// Newest registered value, taken by the request that drains the batch
    latest: Option<Value>,
    /// Sequence number of the last batch that reached the store
    gate: Arc<AsyncMutex<u64>>,
    batch: Arc<BatchSignal>,
}

/// The write owned by one request
///
/// Dropping it before `finish` hands the write back to the batch.
struct Batch {
    seq: u64,
    value: Option<Value>,
    gate: Arc<AsyncMutex<u64>>,
    held: Option<OwnedMutexGuard<u64>>,
    signal: Arc<BatchSignal>,
    settled: bool,
}

impl Batch {
    fn finish(mut self, written: bool) {
        if written {
            if let Some(held) = self.held.as_mut() {
                **held = self.seq;
            }
        }
        self.settled = true;
        self.signal.settle(BatchState::Done);
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if !self.settled {
            self.signal.settle(BatchState::Orphaned(Drained {
                seq: self.seq,
                value: self.value.take(),
                gate: self.gate.clone(),
            }));
        }
    }
}

#[derive(Default)]
struct Slots {
    next_seq: u64,
    by_key: HashMap<String, PendingSlot>,
}

/// Write-coalescing engine shared by everything persisted in one namespace
#[derive(Default)]
pub struct FlushEngine {
    slots: Mutex<Slots>,
}

/// Deregisters a pending request if its future is dropped mid-flight
struct Registration<'a> {
    engine: &'a FlushEngine,
    key: &'a str,
    batch: Arc<BatchSignal>,
    armed: bool,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(drained) = self.engine.release(self.key) {
            debug!("Flush of {} cancelled while draining its batch", self.key);
            self.batch.settle(BatchState::Orphaned(drained));
        }
    }
}

impl FlushEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests currently pending for `key`
    pub fn pending(&self, key: &str) -> usize {
        self.lock()
            .by_key
            .get(key)
            .map(|slot| slot.in_flight)
            .unwrap_or(0)
    }

    /// Persist `value` under `key` once concurrent requests settle.
    pub async fn flush_value(
        &self,
        store: &dyn KvStore,
        key: &str,
        value: Value,
    ) -> Result<FlushOutcome> {
        let Some(batch) = self.coalesce(key, Some(value)).await else {
            return Ok(FlushOutcome::Coalesced);
        };

        let Some(value) = batch.value.clone() else {
            batch.finish(false);
            return Ok(FlushOutcome::Coalesced);
        };

        let result = store.put(key, value).await;
        batch.finish(result.is_ok());
        result?;
        info!("Flushed key {}", key);
        Ok(FlushOutcome::Written)
    }

    /// Run `write` once concurrent requests for `key` settle.
    ///
    /// The value is produced by `write` itself at write time, so callers
    /// flushing derived state (a whole table, the id counters) always
    /// persist the current snapshot.
    pub async fn flush_with<F, Fut>(&self, key: &str, write: F) -> Result<FlushOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(batch) = self.coalesce(key, None).await else {
            return Ok(FlushOutcome::Coalesced);
        };

        let result = write().await;
        batch.finish(result.is_ok());
        result?;
        info!("Flushed {}", key);
        Ok(FlushOutcome::Written)
    }

    async fn coalesce(&self, key: &str, value: Option<Value>) -> Option<Batch> {
        let signal = self.register(key, value);
        let mut registration = Registration {
            engine: self,
            key,
            batch: signal.clone(),
            armed: true,
        };

        tokio::task::yield_now().await;

        registration.armed = false;
        let drained = match self.release(key) {
            Some(drained) => drained,
            None => match signal.wait().await {
                Some(drained) => {
                    debug!("Flush of {} taken over from a cancelled writer", key);
                    drained
                }
                None => {
                    debug!("Flush of {} coalesced into another request", key);
                    return None;
                }
            },
        };

        let mut batch = Batch {
            seq: drained.seq,
            value: drained.value,
            gate: drained.gate.clone(),
            held: None,
            signal,
            settled: false,
        };

        let held = drained.gate.lock_owned().await;
        let superseded = *held >= batch.seq;
        batch.held = Some(held);
        if superseded {
            debug!("Flush of {} superseded by a newer write", key);
            batch.finish(false);
            return None;
        }

        Some(batch)
    }

    fn register(&self, key: &str, value: Option<Value>) -> Arc<BatchSignal> {
        let mut slots = self.lock();
        slots.next_seq += 1;
        let seq = slots.next_seq;

        let slot = slots.by_key.entry(key.to_string()).or_default();
        slot.in_flight += 1;
        slot.last_seq = seq;
        if value.is_some() {
            slot.latest = value;
        }
        slot.batch.clone()
    }

    /// Deregister one request; returns the batch if the count hit zero
    fn release(&self, key: &str) -> Option<Drained> {
        let mut slots = self.lock();
        let slot = slots.by_key.get_mut(key)?;

        slot.in_flight = slot.in_flight.saturating_sub(1);
        if slot.in_flight > 0 {
            return None;
        }

        slot.batch = Arc::default();
        Some(Drained {
            seq: slot.last_seq,
            value: slot.latest.take(),
            gate: slot.gate.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        lock(&self.slots)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStore;
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_requests_write_once_with_latest_value() {
        let store = RecordingStore::new();
        let engine = FlushEngine::new();

        let outcomes = join_all(
            (1..=5).map(|n| engine.flush_value(&store, "pk_map", json!({ "users": n }))),
        )
        .await;

        let written = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(FlushOutcome::Written)))
            .count();
        assert_eq!(written, 1);
        assert_eq!(store.puts("pk_map"), vec![json!({ "users": 5 })]);
        assert_eq!(engine.pending("pk_map"), 0);
    }

    #[tokio::test]
    async fn test_sequential_requests_each_write() {
        let store = RecordingStore::new();
        let engine = FlushEngine::new();

        for n in 1..=3 {
            let outcome = engine
                .flush_value(&store, "k", json!(n))
                .await
                .unwrap();
            assert_eq!(outcome, FlushOutcome::Written);
        }

        assert_eq!(store.puts("k"), vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_independent_keys_do_not_coalesce() {
        let store = RecordingStore::new();
        let engine = FlushEngine::new();

        let (a, b) = tokio::join!(
            engine.flush_value(&store, "a", json!("a")),
            engine.flush_value(&store, "b", json!("b")),
        );

        assert_eq!(a.unwrap(), FlushOutcome::Written);
        assert_eq!(b.unwrap(), FlushOutcome::Written);
        assert_eq!(store.put_count("a"), 1);
        assert_eq!(store.put_count("b"), 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_only_the_writer() {
        let store = RecordingStore::new();
        store.fail_puts(true);
        let engine = FlushEngine::new();

        let outcomes =
            join_all((0..3).map(|n| engine.flush_value(&store, "k", json!(n)))).await;

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        let coalesced = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(FlushOutcome::Coalesced)))
            .count();
        assert_eq!(failed, 1);
        assert_eq!(coalesced, 2);

        // No retry: the next request writes normally once the store recovers.
        store.fail_puts(false);
        let outcome = engine.flush_value(&store, "k", json!(9)).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Written);
        assert_eq!(store.puts("k"), vec![json!(9)]);
    }

    #[tokio::test]
    async fn test_flush_with_runs_writer_once() {
        let engine = FlushEngine::new();
        let writes = AtomicUsize::new(0);

        let outcomes = join_all((0..4).map(|_| {
            engine.flush_with("users", || async {
                writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
        .await;

        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert!(outcomes.iter().all(|o| o.is_ok()));
    }

    #[tokio::test]
    async fn test_dropped_request_releases_its_slot() {
        let store = RecordingStore::new();
        let engine = FlushEngine::new();

        {
            let mut pending = tokio_test::task::spawn(engine.flush_value(&store, "k", json!(1)));
            tokio_test::assert_pending!(pending.poll());
            assert_eq!(engine.pending("k"), 1);
        }
        assert_eq!(engine.pending("k"), 0);

        let outcome = engine.flush_value(&store, "k", json!(2)).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Written);
        assert_eq!(store.puts("k"), vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_cancelled_writer_hands_value_to_its_batch() {
        let store = RecordingStore::new();
        let engine = FlushEngine::new();

        let mut first = tokio_test::task::spawn(engine.flush_value(&store, "k", json!(1)));
        let mut second = tokio_test::task::spawn(engine.flush_value(&store, "k", json!(2)));
        tokio_test::assert_pending!(first.poll());
        tokio_test::assert_pending!(second.poll());

        // first deregisters and waits for the write second would perform
        tokio_test::assert_pending!(first.poll());
        assert_eq!(engine.pending("k"), 1);

        drop(second);
        assert_eq!(engine.pending("k"), 0);
        assert!(first.is_woken());

        let outcome = tokio_test::assert_ready!(first.poll()).unwrap();
        assert_eq!(outcome, FlushOutcome::Written);
        assert_eq!(store.puts("k"), vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_writer_dropped_mid_write_is_replaced() {
        let engine = FlushEngine::new();
        let writes = AtomicUsize::new(0);

        let mut waiting = tokio_test::task::spawn(engine.flush_with("users", || async {
            writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let mut stuck = tokio_test::task::spawn(
            engine.flush_with("users", || std::future::pending::<Result<()>>()),
        );
        tokio_test::assert_pending!(waiting.poll());
        tokio_test::assert_pending!(stuck.poll());
        tokio_test::assert_pending!(waiting.poll());
        // stuck drained the batch and never finishes its write
        tokio_test::assert_pending!(stuck.poll());
        assert_eq!(writes.load(Ordering::SeqCst), 0);

        drop(stuck);
        let outcome = tokio_test::assert_ready!(waiting.poll()).unwrap();
        assert_eq!(outcome, FlushOutcome::Written);
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }
}
