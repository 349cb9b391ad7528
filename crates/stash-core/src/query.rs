//! FIFO ordering for table queries
//!
//! Every query takes a ticket from a monotonically increasing counter and
//! joins the table's queue. A ticket runs only once it reaches the head of
//! the queue, and is removed when it is dropped, which hands the turn to the
//! next ticket through its own wakeup channel. Queries therefore complete in
//! the order they were submitted, without polling.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Default)]
pub struct QuerySerializer {
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    next_ticket: u64,
    queue: VecDeque<Waiting>,
}

struct Waiting {
    ticket: u64,
    wake: Option<oneshot::Sender<()>>,
}

/// A place in the query queue.
///
/// Dropping the ticket leaves the queue, whether or not its turn came.
pub struct QueryTicket<'a> {
    serializer: &'a QuerySerializer,
    id: u64,
    turn: Option<oneshot::Receiver<()>>,
}

impl QuerySerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the end of the queue
    pub fn enqueue(&self) -> QueryTicket<'_> {
        let mut state = self.lock();
        state.next_ticket += 1;
        let id = state.next_ticket;

        let turn = if state.queue.is_empty() {
            state.queue.push_back(Waiting {
                ticket: id,
                wake: None,
            });
            None
        } else {
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiting {
                ticket: id,
                wake: Some(tx),
            });
            Some(rx)
        };

        trace!("Query ticket {} enqueued", id);
        QueryTicket {
            serializer: self,
            id,
            turn,
        }
    }

    /// Tickets waiting or running
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    fn leave(&self, id: u64) {
        let mut state = self.lock();
        let Some(position) = state.queue.iter().position(|w| w.ticket == id) else {
            return;
        };
        state.queue.remove(position);

        if position == 0 {
            if let Some(next) = state.queue.front_mut() {
                if let Some(wake) = next.wake.take() {
                    trace!("Query ticket {} reached the head", next.ticket);
                    let _ = wake.send(());
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl QueryTicket<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait until this ticket is at the head of the queue
    pub async fn turn(&mut self) {
        if let Some(turn) = self.turn.take() {
            // The sender only goes away without a send when this ticket has
            // already left the queue.
            let _ = turn.await;
        }
    }
}

impl Drop for QueryTicket<'_> {
    fn drop(&mut self) {
        self.serializer.leave(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready};

    async fn record_turn(serializer: &QuerySerializer, order: &Mutex<Vec<u32>>, n: u32) {
        let mut ticket = serializer.enqueue();
        ticket.turn().await;
        order.lock().unwrap().push(n);
    }

    #[test]
    fn test_first_ticket_runs_immediately() {
        let serializer = QuerySerializer::new();
        let mut ticket = serializer.enqueue();
        assert_ready!(task::spawn(ticket.turn()).poll());
        drop(ticket);
        assert!(serializer.is_empty());
    }

    #[test]
    fn test_ticket_ids_increase() {
        let serializer = QuerySerializer::new();
        let ids: Vec<u64> = (0..4).map(|_| serializer.enqueue().id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(serializer.is_empty());
    }

    #[test]
    fn test_queries_resolve_in_submission_order() {
        let serializer = QuerySerializer::new();
        let order = Mutex::new(Vec::new());

        let blocker = serializer.enqueue();

        let mut first = task::spawn(record_turn(&serializer, &order, 1));
        let mut second = task::spawn(record_turn(&serializer, &order, 2));
        let mut third = task::spawn(record_turn(&serializer, &order, 3));

        assert_pending!(first.poll());
        assert_pending!(second.poll());
        assert_pending!(third.poll());
        assert_eq!(serializer.len(), 4);

        drop(blocker);
        assert!(first.is_woken());
        assert!(!second.is_woken());

        // Later submissions stay parked until their predecessors finish.
        assert_pending!(third.poll());
        assert_pending!(second.poll());
        assert_ready!(first.poll());

        assert!(second.is_woken());
        assert_ready!(second.poll());
        assert_ready!(third.poll());

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        assert!(serializer.is_empty());
    }

    #[test]
    fn test_abandoned_ticket_leaves_queue() {
        let serializer = QuerySerializer::new();

        let head = serializer.enqueue();
        let abandoned = serializer.enqueue();
        let mut last = serializer.enqueue();
        assert_eq!(serializer.len(), 3);

        drop(abandoned);
        assert_eq!(serializer.len(), 2);

        let mut waiting = task::spawn(last.turn());
        assert_pending!(waiting.poll());

        drop(head);
        assert!(waiting.is_woken());
        assert_ready!(waiting.poll());
        drop(waiting);
        drop(last);
        assert!(serializer.is_empty());
    }
}
