//! Coalescing entity loader.
//!
//! One slot per key. Concurrent loads for the same key within a session's
//! lifetime collapse into a single physical lookup: the first load queues the
//! key, later loads subscribe to the same slot, and every waiter holds a
//! oneshot receiver fed when the dispatched batch settles. Resolved values
//! memoize for the session's remaining lifetime.
//!
//! Invalidation evicts memoized slots outright; a queued or in-flight slot is
//! only marked, so its waiters still receive the fetched value but the value
//! is not memoized and the next load refetches.

use std::{collections::HashMap, future::Future};

use parking_lot::Mutex;
use stratadb_types::{Entity, EntityKey};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type LoadResult = Result<Option<Entity>>;

enum Slot {
    /// Queued, waiting for the next flush.
    Pending { waiters: Vec<oneshot::Sender<LoadResult>>, invalidated: bool },
    /// Physical fetch in flight.
    InFlight { waiters: Vec<oneshot::Sender<LoadResult>>, invalidated: bool },
    /// Memoized for the rest of the session.
    Resolved(LoadResult),
}

#[derive(Default)]
struct LoaderState {
    slots: HashMap<EntityKey, Slot>,
    queue: Vec<EntityKey>,
}

enum Waiter {
    Ready(LoadResult),
    Wait(oneshot::Receiver<LoadResult>),
}

/// The session's entity cache.
#[derive(Default)]
pub(crate) struct EntityLoader {
    state: Mutex<LoaderState>,
}

impl EntityLoader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues a load, coalescing with any outstanding request for the key.
    ///
    /// The returned future resolves once a flush settles the key (or
    /// immediately for memoized values); it must be driven under
    /// [`Session::run`](crate::session::Session::run) or it will wait
    /// forever.
    pub(crate) fn load(&self, key: EntityKey) -> impl Future<Output = LoadResult> + Send + 'static {
        let waiter = {
            let mut state = self.state.lock();
            match state.slots.get_mut(&key) {
                Some(Slot::Resolved(result)) => Waiter::Ready(result.clone()),
                Some(Slot::Pending { waiters, .. }) | Some(Slot::InFlight { waiters, .. }) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Waiter::Wait(rx)
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    state
                        .slots
                        .insert(key.clone(), Slot::Pending { waiters: vec![tx], invalidated: false });
                    state.queue.push(key);
                    Waiter::Wait(rx)
                }
            }
        };
        async move {
            match waiter {
                Waiter::Ready(result) => result,
                Waiter::Wait(rx) => rx.await.unwrap_or(Err(Error::Dropped)),
            }
        }
    }

    /// Number of keys queued and not yet dispatched.
    pub(crate) fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Moves every queued key in flight, chunked to the batch cap.
    pub(crate) fn take_batches(&self, max_batch_size: usize) -> Vec<Vec<EntityKey>> {
        let mut state = self.state.lock();
        let keys = std::mem::take(&mut state.queue);
        for key in &keys {
            if let Some(slot) = state.slots.get_mut(key) {
                if let Slot::Pending { waiters, invalidated } = slot {
                    let waiters = std::mem::take(waiters);
                    let invalidated = *invalidated;
                    *slot = Slot::InFlight { waiters, invalidated };
                }
            }
        }
        keys.chunks(max_batch_size.max(1)).map(<[EntityKey]>::to_vec).collect()
    }

    /// Delivers a fetched result to every waiter of the key, memoizing it
    /// unless the key was invalidated while the fetch was in flight.
    pub(crate) fn complete(&self, key: &EntityKey, result: LoadResult) {
        let waiters = {
            let mut state = self.state.lock();
            match state.slots.remove(key) {
                Some(Slot::InFlight { waiters, invalidated })
                | Some(Slot::Pending { waiters, invalidated }) => {
                    if !invalidated {
                        state.slots.insert(key.clone(), Slot::Resolved(result.clone()));
                    }
                    waiters
                }
                Some(resolved @ Slot::Resolved(_)) => {
                    state.slots.insert(key.clone(), resolved);
                    Vec::new()
                }
                None => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Evicts the key after a write: memoized slots are dropped, queued and
    /// in-flight slots are marked so their result is delivered but never
    /// memoized.
    pub(crate) fn invalidate(&self, key: &EntityKey) {
        let mut state = self.state.lock();
        match state.slots.get_mut(key) {
            Some(Slot::Resolved(_)) => {
                state.slots.remove(key);
            }
            Some(Slot::Pending { invalidated, .. }) | Some(Slot::InFlight { invalidated, .. }) => {
                *invalidated = true;
            }
            None => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use stratadb_types::TenantId;

    use super::*;

    fn key(id: &str) -> EntityKey {
        EntityKey::new(TenantId::new("t"), "users", id)
    }

    fn entity(id: &str) -> Entity {
        Entity::with_id("users", id)
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_slot() {
        let loader = EntityLoader::new();
        let first = loader.load(key("u-1"));
        let second = loader.load(key("u-1"));
        assert_eq!(loader.pending(), 1);

        let batches = loader.take_batches(10);
        assert_eq!(batches, vec![vec![key("u-1")]]);
        loader.complete(&key("u-1"), Ok(Some(entity("u-1"))));

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.expect("load").expect("entity").id(), Some("u-1"));
        assert_eq!(b.expect("load").expect("entity").id(), Some("u-1"));
    }

    #[tokio::test]
    async fn test_resolved_value_memoizes() {
        let loader = EntityLoader::new();
        let first = loader.load(key("u-1"));
        loader.take_batches(10);
        loader.complete(&key("u-1"), Ok(None));
        assert!(first.await.expect("load").is_none());

        // A later load is served from the slot without queueing anything.
        let second = loader.load(key("u-1"));
        assert_eq!(loader.pending(), 0);
        assert!(second.await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_take_batches_chunks_by_cap() {
        let loader = EntityLoader::new();
        for id in ["a", "b", "c", "d", "e"] {
            drop(loader.load(key(id)));
        }
        let batches = loader.take_batches(2);
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, [2, 2, 1]);
        assert_eq!(loader.pending(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_drops_memoized_slot() {
        let loader = EntityLoader::new();
        let first = loader.load(key("u-1"));
        loader.take_batches(10);
        loader.complete(&key("u-1"), Ok(Some(entity("u-1"))));
        first.await.expect("load");

        loader.invalidate(&key("u-1"));
        drop(loader.load(key("u-1")));
        // The key queues again instead of hitting the dropped slot.
        assert_eq!(loader.pending(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_in_flight_delivers_but_does_not_memoize() {
        let loader = EntityLoader::new();
        let first = loader.load(key("u-1"));
        loader.take_batches(10);

        loader.invalidate(&key("u-1"));
        loader.complete(&key("u-1"), Ok(Some(entity("u-1"))));

        // The racing waiter still gets the fetched value.
        assert!(first.await.expect("load").is_some());
        // But the next load refetches.
        drop(loader.load(key("u-1")));
        assert_eq!(loader.pending(), 1);
    }

    #[tokio::test]
    async fn test_dropped_loader_fails_waiters() {
        let loader = EntityLoader::new();
        let pending = loader.load(key("u-1"));
        loader.take_batches(10);
        // Simulate the batch never settling: evict the in-flight slot and
        // drop its senders.
        loader.state.lock().slots.clear();

        assert!(matches!(pending.await, Err(Error::Dropped)));
    }
}
