//! Correlation table for in-flight render calls.
//!
//! Maps a request id to the one-shot channel its caller waits on. Every slot is
//! removed from the map before anything is sent on it, so an outcome is
//! delivered at most once even when a response, a cancellation and a shutdown
//! race for the same id.

use crate::error::{Result, WorkerError};
use crate::protocol::RenderOutcome;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Default)]
struct Slots {
    waiting: HashMap<String, oneshot::Sender<RenderOutcome>>,
    /// Set once by [`PendingCalls::close_and_drain`]; registration fails afterwards.
    closed: bool,
}

/// Thread-safe map from request id to a single-delivery response slot.
#[derive(Default)]
pub struct PendingCalls {
    slots: Mutex<Slots>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // No invariant spans a panic inside the critical sections below.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a fresh slot for `id`.
    ///
    /// The returned guard removes the slot when dropped, so a caller that
    /// stops waiting for any reason never leaves its id behind.
    pub fn register(&self, id: &str) -> Result<(PendingGuard<'_>, oneshot::Receiver<RenderOutcome>)> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.lock();
        if slots.closed {
            return Err(WorkerError::WorkerStopped);
        }
        if slots.waiting.contains_key(id) {
            return Err(WorkerError::DuplicateRequestId(id.to_string()));
        }
        slots.waiting.insert(id.to_string(), tx);
        drop(slots);

        Ok((
            PendingGuard {
                table: self,
                id: Some(id.to_string()),
            },
            rx,
        ))
    }

    /// Deliver `outcome` to the caller waiting on `id`.
    ///
    /// Returns `false` when no such slot exists (already resolved, canceled, or
    /// never registered) or the caller hung up.
    pub fn resolve(&self, id: &str, outcome: RenderOutcome) -> bool {
        let slot = self.lock().waiting.remove(id);
        match slot {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Forget `id` without delivering anything.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().waiting.remove(id).is_some()
    }

    /// Refuse new registrations and resolve every waiting caller with
    /// [`RenderOutcome::Stopped`]. Returns how many callers were drained.
    pub fn close_and_drain(&self) -> usize {
        let drained: Vec<_> = {
            let mut slots = self.lock();
            slots.closed = true;
            slots.waiting.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(RenderOutcome::Stopped);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Removes its id from the table on drop unless [`disarm`](Self::disarm)ed.
pub struct PendingGuard<'a> {
    table: &'a PendingCalls,
    id: Option<String>,
}

impl PendingGuard<'_> {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// The slot was already consumed by a resolution; nothing left to remove.
    pub fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.table.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let table = PendingCalls::new();
        let (guard, rx) = table.register("req-1").unwrap();

        assert!(table.resolve("req-1", RenderOutcome::Rendered("<p>ok</p>".into())));
        assert!(!table.resolve("req-1", RenderOutcome::Rendered("again".into())));

        assert_eq!(rx.await.unwrap(), RenderOutcome::Rendered("<p>ok</p>".into()));
        guard.disarm();
        assert!(table.is_empty());
    }

    #[test]
    fn test_resolve_unknown_id_is_noop() {
        let table = PendingCalls::new();
        assert!(!table.resolve("req-404", RenderOutcome::Stopped));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let table = PendingCalls::new();
        let (_guard, _rx) = table.register("req-1").unwrap();

        let err = table.register("req-1").err().unwrap();
        assert!(matches!(err, WorkerError::DuplicateRequestId(id) if id == "req-1"));
    }

    #[test]
    fn test_guard_drop_removes_slot() {
        let table = PendingCalls::new();
        {
            let (guard, _rx) = table.register("req-1").unwrap();
            assert_eq!(guard.id(), "req-1");
            assert_eq!(table.len(), 1);
        }
        assert!(table.is_empty());
        assert!(!table.resolve("req-1", RenderOutcome::Rendered("late".into())));
    }

    #[tokio::test]
    async fn test_close_and_drain_stops_every_waiter() {
        let table = PendingCalls::new();
        let (_g1, rx1) = table.register("req-1").unwrap();
        let (_g2, rx2) = table.register("req-2").unwrap();

        assert_eq!(table.close_and_drain(), 2);
        assert_eq!(rx1.await.unwrap(), RenderOutcome::Stopped);
        assert_eq!(rx2.await.unwrap(), RenderOutcome::Stopped);
        assert!(table.is_closed());

        assert!(matches!(
            table.register("req-3").err().unwrap(),
            WorkerError::WorkerStopped
        ));
        assert_eq!(table.close_and_drain(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_never_double_delivers() {
        let table = Arc::new(PendingCalls::new());
        let mut receivers = Vec::new();
        for i in 0..64 {
            let (guard, rx) = table.register(&format!("req-{}", i)).unwrap();
            guard.disarm();
            receivers.push(rx);
        }

        let mut tasks = Vec::new();
        for worker in 0..4 {
            let table = table.clone();
            tasks.push(tokio::spawn(async move {
                let mut delivered = 0;
                for i in 0..64 {
                    let outcome = RenderOutcome::Rendered(format!("{}:{}", worker, i));
                    if table.resolve(&format!("req-{}", i), outcome) {
                        delivered += 1;
                    }
                }
                delivered
            }));
        }

        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }
        assert_eq!(total, 64);
        for (i, rx) in receivers.into_iter().enumerate() {
            match rx.await.unwrap() {
                RenderOutcome::Rendered(html) => assert!(html.ends_with(&format!(":{}", i))),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }
}
