//! Pending-call table: correlation ids and their single-assignment reply slots.
//!
//! Ids are recycled with a stack discipline: the most recently freed id is
//! handed out first, otherwise the current table size becomes the new id.
//! Every id leaves the table through [`PendingCalls::take`] or
//! [`PendingCalls::fail_all`] and goes back on the free list, so in-flight
//! ids plus free ids always cover `0..n` exactly and a fresh id never
//! collides with a live one.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use glide_ipc_core::Value;
use tokio::sync::oneshot;

use crate::error::{ClientError, ClientResult};

/// Sending half of a pending call. Consumed by the single write to the slot.
pub type ReplySender = oneshot::Sender<ClientResult<Value>>;

#[derive(Default)]
struct PendingState {
    calls: HashMap<u32, ReplySender>,
    free_ids: Vec<u32>,
    closed: bool,
}

/// Table of in-flight requests keyed by correlation id.
#[derive(Default)]
pub struct PendingCalls {
    state: Mutex<PendingState>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate an id and a fresh reply slot for it.
    ///
    /// Fails with the closed-client error once [`fail_all`](Self::fail_all)
    /// has run.
    pub fn register(&self) -> ClientResult<(u32, ReplyFuture)> {
        let mut state = self.state();
        if state.closed {
            return Err(ClientError::closed());
        }

        let id = match state.free_ids.pop() {
            Some(id) => id,
            None => state.calls.len() as u32,
        };
        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Ok((id, ReplyFuture { rx }))
    }

    /// Pop the reply slot for `id` and recycle the id.
    ///
    /// Returns `None` for an id that is not in flight.
    pub fn take(&self, id: u32) -> Option<ReplySender> {
        let mut state = self.state();
        let sender = state.calls.remove(&id)?;
        state.free_ids.push(id);
        Some(sender)
    }

    /// Pop and resolve the call for `id`.
    ///
    /// Returns `false` if no such call was in flight. A waiter that already
    /// went away is not an error.
    pub fn resolve(&self, id: u32, result: ClientResult<Value>) -> bool {
        match self.take(id) {
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight call with `error` and refuse new registrations.
    ///
    /// Returns the number of calls failed. Calling it again fails nothing.
    pub fn fail_all(&self, error: &ClientError) -> usize {
        let drained: Vec<(u32, ReplySender)> = {
            let mut state = self.state();
            state.closed = true;
            let drained: Vec<_> = state.calls.drain().collect();
            let ids = drained.iter().map(|(id, _)| *id);
            state.free_ids.extend(ids);
            drained
        };

        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(error.clone()));
        }
        count
    }

    /// Number of calls in flight.
    pub fn len(&self) -> usize {
        self.state().calls.len()
    }

    /// Whether no call is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether registrations are refused.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

/// Future resolving to the reply of one request.
///
/// If the slot is dropped without a write, which only happens when the
/// table itself goes away, the caller sees the closed-client error.
#[derive(Debug)]
pub struct ReplyFuture {
    rx: oneshot::Receiver<ClientResult<Value>>,
}

impl Future for ReplyFuture {
    type Output = ClientResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::closed())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let table = PendingCalls::new();
        let (id, reply) = table.register().expect("register");
        assert_eq!(id, 0);

        assert!(table.resolve(id, Ok(Value::Int(1))));
        assert_eq!(reply.await, Ok(Value::Int(1)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_ids_recycle_most_recent_first() {
        let table = PendingCalls::new();
        let (a, _ra) = table.register().expect("register");
        let (b, _rb) = table.register().expect("register");
        let (c, _rc) = table.register().expect("register");
        assert_eq!((a, b, c), (0, 1, 2));

        assert!(table.take(a).is_some());
        assert!(table.take(c).is_some());

        let (d, _rd) = table.register().expect("register");
        let (e, _re) = table.register().expect("register");
        let (f, _rf) = table.register().expect("register");
        assert_eq!(d, c);
        assert_eq!(e, a);
        assert_eq!(f, 3);
    }

    #[test]
    fn test_unknown_id() {
        let table = PendingCalls::new();
        assert!(!table.resolve(9, Ok(Value::Nil)));
    }

    #[tokio::test]
    async fn test_slot_written_once() {
        let table = PendingCalls::new();
        let (id, reply) = table.register().expect("register");
        assert!(table.resolve(id, Ok(Value::Okay)));
        // Second write finds no slot; the first result stands.
        assert!(!table.resolve(id, Err(ClientError::closed())));
        assert_eq!(reply.await, Ok(Value::Okay));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let table = PendingCalls::new();
        let replies: Vec<_> = (0..5)
            .map(|_| table.register().expect("register").1)
            .collect();

        let cause = ClientError::Closing("shutdown".to_string());
        assert_eq!(table.fail_all(&cause), 5);
        assert_eq!(table.fail_all(&cause), 0);

        for reply in replies {
            assert_eq!(reply.await, Err(cause.clone()));
        }
        assert!(table.is_closed());
        assert_eq!(table.register().err(), Some(ClientError::closed()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ids_unique() {
        let table = Arc::new(PendingCalls::new());
        let live = Arc::new(Mutex::new(HashSet::new()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let live = live.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let (id, reply) = table.register().expect("register");
                    assert!(live.lock().expect("lock").insert(id), "id {id} reused");
                    tokio::task::yield_now().await;
                    assert!(live.lock().expect("lock").remove(&id));
                    assert!(table.resolve(id, Ok(Value::Int(i64::from(id)))));
                    assert_eq!(reply.await, Ok(Value::Int(i64::from(id))));
                }
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn prop_live_ids_never_collide(ops in proptest::collection::vec((any::<bool>(), any::<prop::sample::Index>()), 1..300)) {
            let table = PendingCalls::new();
            let mut live: Vec<u32> = Vec::new();
            let mut replies = Vec::new();

            for (allocate, pick) in ops {
                if allocate || live.is_empty() {
                    let (id, reply) = table.register().expect("register");
                    prop_assert!(!live.contains(&id));
                    live.push(id);
                    replies.push(reply);
                } else {
                    let id = live.swap_remove(pick.index(live.len()));
                    prop_assert!(table.take(id).is_some());
                }
                prop_assert_eq!(table.len(), live.len());
            }
        }
    }
}
