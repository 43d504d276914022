//! Memoizing query cache.
//!
//! Queries are not merged by batching: the first load for a key spawns its
//! physical call immediately. Concurrent loads for an equal key (tenant,
//! table, and the whole filter) share that one call, and the result memoizes
//! until a write to the table invalidates it.

use std::{collections::HashMap, future::Future, sync::Arc};

use parking_lot::Mutex;
use snafu::ResultExt;
use stratadb_engine::Driver;
use stratadb_types::{Entity, QueryKey, TenantId};
use tokio::sync::oneshot;

use crate::error::{DriverSnafu, Error, Result};

type QueryResult = Result<Vec<Entity>>;

enum Slot {
    InFlight { waiters: Vec<oneshot::Sender<QueryResult>>, invalidated: bool },
    Resolved(QueryResult),
}

/// The session's query cache.
pub(crate) struct QueryCache {
    driver: Arc<dyn Driver>,
    slots: Mutex<HashMap<QueryKey, Slot>>,
}

impl QueryCache {
    pub(crate) fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver, slots: Mutex::new(HashMap::new()) }
    }

    /// Loads a query result, sharing one physical call per distinct key.
    pub(crate) fn load(
        self: &Arc<Self>,
        key: QueryKey,
    ) -> impl Future<Output = QueryResult> + Send + 'static {
        enum Waiter {
            Ready(QueryResult),
            Wait(oneshot::Receiver<QueryResult>),
        }

        let waiter = {
            let mut slots = self.slots.lock();
            match slots.get_mut(&key) {
                Some(Slot::Resolved(result)) => Waiter::Ready(result.clone()),
                Some(Slot::InFlight { waiters, .. }) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Waiter::Wait(rx)
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(
                        key.clone(),
                        Slot::InFlight { waiters: vec![tx], invalidated: false },
                    );

                    // Queries run independently and immediately; only entity
                    // lookups wait for the dispatch loop.
                    let cache = Arc::clone(self);
                    tokio::spawn(async move {
                        let result = cache.driver.query(&key).await.context(DriverSnafu);
                        cache.complete(&key, result);
                    });
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

    fn complete(&self, key: &QueryKey, result: QueryResult) {
        let waiters = {
            let mut slots = self.slots.lock();
            match slots.remove(key) {
                Some(Slot::InFlight { waiters, invalidated }) => {
                    if !invalidated {
                        slots.insert(key.clone(), Slot::Resolved(result.clone()));
                    }
                    waiters
                }
                Some(resolved @ Slot::Resolved(_)) => {
                    slots.insert(key.clone(), resolved);
                    Vec::new()
                }
                None => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Evicts every cached query for (tenant, table); a write can change any
    /// of their result sets regardless of filter.
    pub(crate) fn invalidate_table(&self, tenant: &TenantId, table: &str) {
        let mut slots = self.slots.lock();
        slots.retain(|key, slot| {
            if key.tenant != *tenant || key.query.table != table {
                return true;
            }
            match slot {
                Slot::Resolved(_) => false,
                Slot::InFlight { invalidated, .. } => {
                    *invalidated = true;
                    true
                }
            }
        });
    }
}
