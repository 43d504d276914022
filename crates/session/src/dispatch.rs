//! The cooperative dispatch loop.
//!
//! Resolving one entity's links may only discover the need for further loads
//! after the first load completes, so a caller hands its whole computation to
//! [`Session::run`]: the loop flushes pending coalesced loads whenever any
//! exist, and otherwise waits a short grace interval for new work to surface
//! before checking the target again. The loop is a single-flow trampoline: it
//! only decides when to flush already-enqueued work, never running request
//! logic concurrently with itself. Nothing else in the session waits.

use std::{task::Poll, time::Duration};

use futures::future::join_all;
use stratadb_types::EntityKey;
use tracing::{debug, warn};

use crate::{error::Error, session::Session};

/// How long to wait for a just-completed batch's continuation to enqueue more
/// work before re-checking the target.
const GRACE_INTERVAL: Duration = Duration::from_millis(10);

impl Session {
    /// Drives `target` to completion, flushing pending batches as they
    /// appear.
    ///
    /// Every read issued against this session must be awaited somewhere
    /// inside a computation driven by `run`; a load awaited outside the loop
    /// has nothing to flush it.
    pub async fn run<F>(&self, target: F) -> F::Output
    where
        F: std::future::Future,
    {
        tokio::pin!(target);
        loop {
            // Let the target make progress and enqueue loads.
            if let Poll::Ready(output) = futures::poll!(target.as_mut()) {
                return output;
            }

            if self.entities.pending() > 0 {
                self.flush().await;
            } else {
                tokio::select! {
                    output = target.as_mut() => return output,
                    () = tokio::time::sleep(GRACE_INTERVAL) => {}
                }
            }
        }
    }

    /// Flushes every queued entity load, one physical call per chunk, all
    /// chunks concurrently.
    async fn flush(&self) {
        let batches = self.entities.take_batches(self.driver().max_batch_size());
        debug!(batches = batches.len(), "flushing coalesced loads");
        join_all(batches.into_iter().map(|batch| self.flush_batch(batch))).await;
    }

    async fn flush_batch(&self, keys: Vec<EntityKey>) {
        match self.driver().get(&keys).await {
            Ok(results) => {
                if results.len() != keys.len() {
                    warn!(expected = keys.len(), got = results.len(), "result count mismatch");
                }
                let mut results = results.into_iter();
                for key in &keys {
                    match results.next() {
                        Some(result) => self.entities.complete(key, Ok(result)),
                        None => self.entities.complete(key, Err(Error::Dropped)),
                    }
                }
            }
            Err(source) => {
                let error = Error::Driver { source };
                for key in &keys {
                    self.entities.complete(key, Err(error.clone()));
                }
            }
        }
    }
}
