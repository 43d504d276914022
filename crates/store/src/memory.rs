//! In-memory reference provider.
//!
//! Backs the layer tables with ordered maps so partition scans run in
//! sort-key order. Conditional writes are evaluated under one lock, which
//! gives the same atomicity the real provider offers per row.
//!
//! Every operation counts its calls; tests use the counters to observe
//! batching and cache-coalescing behavior.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use snafu::OptionExt;
use stratadb_types::TenantId;

use crate::{
    error::{Result, TableMissingSnafu},
    row::{Row, RowKey},
    store::{LinkGuard, LinkOp, LinkUpdate, RowScan, RowStore, WriteCondition, WriteOutcome},
};

/// Batch cap of the emulated provider.
const PROVIDER_BATCH_LIMIT: usize = 50;

/// Snapshot of per-operation call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Number of `batch_get` calls.
    pub batch_get: u64,
    /// Number of `query` calls.
    pub query: u64,
    /// Number of `query_global_index` calls.
    pub global_index: u64,
    /// Number of `query_secondary_index` calls.
    pub secondary_index: u64,
    /// Number of `put` calls.
    pub put: u64,
    /// Number of `update_links` calls.
    pub update_links: u64,
    /// Number of `delete` calls.
    pub delete: u64,
}

#[derive(Default)]
struct Counters {
    batch_get: AtomicU64,
    query: AtomicU64,
    global_index: AtomicU64,
    secondary_index: AtomicU64,
    put: AtomicU64,
    update_links: AtomicU64,
    delete: AtomicU64,
}

type TableRows = BTreeMap<RowKey, Row>;

/// In-memory row store over a fixed set of layer tables.
pub struct MemoryRowStore {
    tables: RwLock<HashMap<String, TableRows>>,
    counters: Counters,
    batch_limit: usize,
}

impl MemoryRowStore {
    /// Creates a store with the given layer tables, all empty.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables = tables.into_iter().map(|name| (name.into(), TableRows::new())).collect();
        Self {
            tables: RwLock::new(tables),
            counters: Counters::default(),
            batch_limit: PROVIDER_BATCH_LIMIT,
        }
    }

    /// Overrides the provider batch cap; used by tests exercising chunking.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Returns a snapshot of the per-operation call counts.
    pub fn counts(&self) -> CallCounts {
        CallCounts {
            batch_get: self.counters.batch_get.load(Ordering::Relaxed),
            query: self.counters.query.load(Ordering::Relaxed),
            global_index: self.counters.global_index.load(Ordering::Relaxed),
            secondary_index: self.counters.secondary_index.load(Ordering::Relaxed),
            put: self.counters.put.load(Ordering::Relaxed),
            update_links: self.counters.update_links.load(Ordering::Relaxed),
            delete: self.counters.delete.load(Ordering::Relaxed),
        }
    }

    /// Reads one row directly; test observability only.
    pub fn row(&self, table: &str, key: &RowKey) -> Option<Row> {
        self.tables.read().get(table).and_then(|rows| rows.get(key).cloned())
    }

    fn apply_link_update(row: &mut Row, update: &LinkUpdate) -> WriteOutcome {
        let has_map = row.links.is_some();
        match update.guard {
            LinkGuard::MapExists if !has_map => return WriteOutcome::PreconditionMissing,
            LinkGuard::MapAbsent if has_map => return WriteOutcome::PreconditionMissing,
            _ => {}
        }

        match &update.op {
            LinkOp::Add { table, ids } => {
                let map = row.links.get_or_insert_with(BTreeMap::new);
                map.entry(table.clone()).or_default().extend(ids.iter().cloned());
            }
            LinkOp::Remove { table, ids } => {
                if let Some(map) = row.links.as_mut() {
                    if let Some(set) = map.get_mut(table) {
                        for id in ids {
                            set.remove(id);
                        }
                        if set.is_empty() {
                            map.remove(table);
                        }
                    }
                }
            }
            LinkOp::Set { table, ids } => {
                let map = row.links.get_or_insert_with(BTreeMap::new);
                if ids.is_empty() {
                    map.remove(table);
                } else {
                    map.insert(table.clone(), ids.clone());
                }
            }
            LinkOp::Init { table, ids } => {
                let mut map = BTreeMap::new();
                if !ids.is_empty() {
                    map.insert(table.clone(), ids.clone());
                }
                row.links = Some(map);
            }
        }

        if update.bump_revision {
            row.revision += 1;
        }
        WriteOutcome::Applied { revision: row.revision }
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn batch_get(&self, table: &str, keys: &[RowKey]) -> Result<Vec<Row>> {
        self.counters.batch_get.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let rows = tables.get(table).context(TableMissingSnafu { table })?;

        let mut found = Vec::new();
        for key in keys {
            if let Some(row) = rows.get(key) {
                found.push(row.clone());
            }
        }
        Ok(found)
    }

    async fn query(&self, table: &str, partition: &TenantId, scan: &RowScan) -> Result<Vec<Row>> {
        self.counters.query.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let rows = tables.get(table).context(TableMissingSnafu { table })?;

        // Resume strictly after the cursor when present, else from the prefix.
        let start = match &scan.after {
            Some(after) => Bound::Excluded(RowKey::new(partition.clone(), after.clone())),
            None => Bound::Included(RowKey::new(partition.clone(), scan.prefix.clone())),
        };

        let mut out = Vec::new();
        for (key, row) in rows.range((start, Bound::Unbounded)) {
            if key.partition != *partition {
                break;
            }
            if !key.sort.starts_with(&scan.prefix) {
                break;
            }
            out.push(row.clone());
            if scan.limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
        Ok(out)
    }

    async fn query_global_index(&self, table: &str, value: &str) -> Result<Vec<Row>> {
        self.counters.global_index.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let rows = tables.get(table).context(TableMissingSnafu { table })?;

        Ok(rows
            .values()
            .filter(|row| row.secondary_global.as_deref() == Some(value))
            .cloned()
            .collect())
    }

    async fn query_secondary_index(
        &self,
        table: &str,
        partition: &TenantId,
        value: &str,
    ) -> Result<Vec<String>> {
        self.counters.secondary_index.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let rows = tables.get(table).context(TableMissingSnafu { table })?;

        Ok(rows
            .values()
            .filter(|row| {
                row.partition == *partition && row.secondary_organisation.as_deref() == Some(value)
            })
            .map(|row| row.sort.clone())
            .collect())
    }

    async fn put(&self, table: &str, row: Row, condition: WriteCondition) -> Result<WriteOutcome> {
        self.counters.put.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).context(TableMissingSnafu { table })?;

        let key = row.key();
        let existing = rows.get(&key);
        match condition {
            WriteCondition::NotExists if existing.is_some() => return Ok(WriteOutcome::Conflict),
            WriteCondition::RevisionIs(expected)
                if existing.is_none_or(|stored| stored.revision != expected) =>
            {
                return Ok(WriteOutcome::Conflict);
            }
            _ => {}
        }

        let revision = row.revision;
        rows.insert(key, row);
        Ok(WriteOutcome::Applied { revision })
    }

    async fn update_links(
        &self,
        table: &str,
        key: &RowKey,
        update: LinkUpdate,
    ) -> Result<WriteOutcome> {
        self.counters.update_links.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).context(TableMissingSnafu { table })?;

        match rows.get_mut(key) {
            Some(row) => Ok(Self::apply_link_update(row, &update)),
            // Removals against a missing row are tolerated without
            // materializing anything.
            None if matches!(update.op, LinkOp::Remove { .. }) => {
                Ok(WriteOutcome::Applied { revision: 0 })
            }
            // A map-existence guard can never hold on a missing row.
            None if update.guard == LinkGuard::MapExists => Ok(WriteOutcome::PreconditionMissing),
            // Create-if-absent against a missing row upserts a stub carrying
            // only key, links, and revision.
            None => {
                let mut row = Row::new(key.partition.clone(), key.sort.clone());
                let outcome = Self::apply_link_update(&mut row, &update);
                if matches!(outcome, WriteOutcome::Applied { .. }) {
                    rows.insert(key.clone(), row);
                }
                Ok(outcome)
            }
        }
    }

    async fn delete(&self, table: &str, key: &RowKey) -> Result<bool> {
        self.counters.delete.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).context(TableMissingSnafu { table })?;
        Ok(rows.remove(key).is_some())
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}
