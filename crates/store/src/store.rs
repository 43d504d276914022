//! The row-store contract.
//!
//! Every operation is asynchronous and keyed by (partition, sort key). The
//! store knows nothing about entities or layers; the engine above it encodes
//! entities into rows and merges reads across the layer stack.

use std::collections::BTreeSet;

use async_trait::async_trait;
use stratadb_types::TenantId;

use crate::{
    error::Result,
    row::{Row, RowKey},
};

/// Condition attached to a full-row put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Unconditional write.
    None,
    /// The row must not exist yet (first persist of an entity).
    NotExists,
    /// The stored revision must equal this value.
    RevisionIs(u64),
}

/// Attribute-existence guard on a link update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkGuard {
    /// No guard.
    None,
    /// The row's link map attribute must already exist.
    MapExists,
    /// The row's link map attribute must not exist yet.
    MapAbsent,
}

/// Mutation applied to a row's nested link map.
///
/// The underlying store cannot atomically add-or-create a nested collection
/// in one conditional expression, so callers drive an explicit
/// add-if-present → create-if-absent → retry-add sequence using
/// [`LinkGuard`] and the returned [`WriteOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    /// Add ids to the existing set under `table` (creates the set when only
    /// the entry is missing; the map itself must satisfy the guard).
    Add {
        /// Target table entry in the link map.
        table: String,
        /// Ids to add.
        ids: BTreeSet<String>,
    },
    /// Remove ids from the set under `table`; tolerant of absent rows,
    /// maps, entries, and ids.
    Remove {
        /// Target table entry in the link map.
        table: String,
        /// Ids to remove.
        ids: BTreeSet<String>,
    },
    /// Replace the set under `table` entirely; an empty set clears the entry.
    Set {
        /// Target table entry in the link map.
        table: String,
        /// Replacement ids.
        ids: BTreeSet<String>,
    },
    /// Create the whole link map with this single entry.
    Init {
        /// Target table entry in the link map.
        table: String,
        /// Initial ids.
        ids: BTreeSet<String>,
    },
}

/// A conditional link-map update, optionally bumping the revision in the same
/// atomic step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkUpdate {
    /// The mutation to apply.
    pub op: LinkOp,
    /// Attribute-existence guard.
    pub guard: LinkGuard,
    /// Whether to increment the row revision atomically with the mutation.
    pub bump_revision: bool,
}

/// Outcome of a conditional write.
///
/// Condition failures are values, never errors, so multi-step protocols can
/// branch on them explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied; `revision` is the row's revision afterwards.
    Applied {
        /// Row revision after the write.
        revision: u64,
    },
    /// An attribute-existence guard ([`LinkGuard`]) was not satisfied.
    PreconditionMissing,
    /// A row-existence or revision condition ([`WriteCondition`]) was not
    /// satisfied.
    Conflict,
}

/// Cursor/limit window for a partition query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowScan {
    /// Sort keys must start with this prefix.
    pub prefix: String,
    /// Resume strictly after this full sort key.
    pub after: Option<String>,
    /// Stop after this many rows.
    pub limit: Option<usize>,
}

/// Capability set any backing provider must implement.
///
/// Implementations must be safe for concurrent use; they hold no per-request
/// state.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Fetches the rows present for the given keys, in no particular order.
    /// Missing keys are simply absent from the result.
    async fn batch_get(&self, table: &str, keys: &[RowKey]) -> Result<Vec<Row>>;

    /// Scans one partition in sort-key order, honoring prefix, cursor, and
    /// limit. Pages internally until the limit is satisfied or the partition
    /// is exhausted.
    async fn query(&self, table: &str, partition: &TenantId, scan: &RowScan) -> Result<Vec<Row>>;

    /// Returns every row whose global index attribute equals `value`,
    /// across all partitions.
    async fn query_global_index(&self, table: &str, value: &str) -> Result<Vec<Row>>;

    /// Returns the sort keys of rows in `partition` whose tenant-scoped index
    /// attribute equals `value`.
    async fn query_secondary_index(
        &self,
        table: &str,
        partition: &TenantId,
        value: &str,
    ) -> Result<Vec<String>>;

    /// Writes a full row, subject to an optional existence/revision condition.
    async fn put(&self, table: &str, row: Row, condition: WriteCondition) -> Result<WriteOutcome>;

    /// Applies a conditional link-map update to one row.
    ///
    /// Remove ops against a missing row are tolerated no-ops; an
    /// [`LinkOp::Init`] against a missing row materializes a stub row
    /// carrying only the key, the link map, and the revision.
    async fn update_links(
        &self,
        table: &str,
        key: &RowKey,
        update: LinkUpdate,
    ) -> Result<WriteOutcome>;

    /// Removes a row outright. Returns true when the row existed.
    async fn delete(&self, table: &str, key: &RowKey) -> Result<bool>;

    /// Maximum number of keys one `batch_get` call accepts.
    fn batch_limit(&self) -> usize;
}
