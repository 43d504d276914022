//! Physical row layout.
//!
//! Each layer table stores rows keyed by (partition, sort key). The partition
//! key is the tenant id (or the literal `global`); the sort key is
//! `"{table}:{id}"`. Attribute names are fixed for compatibility across
//! providers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stratadb_types::TenantId;

/// Primary key of a row: tenant partition plus sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    /// Tenant partition (or `global`).
    pub partition: TenantId,
    /// Sort key, `"{table}:{id}"`.
    pub sort: String,
}

impl RowKey {
    /// Creates a row key.
    pub fn new(partition: TenantId, sort: impl Into<String>) -> Self {
        Self { partition, sort: sort.into() }
    }
}

/// One stored row.
///
/// `links` is `None` when the row has no link attribute at all (tombstones
/// never gain one, nor do stub rows created by reciprocal link maintenance
/// before the entity itself was written) and `Some`, possibly empty, on every
/// row written through a full put. The distinction drives the conditional
/// add-if-present / create-if-absent link protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Tenant partition this row lives in.
    pub partition: TenantId,
    /// Sort key, `"{table}:{id}"`.
    pub sort: String,
    /// Top-level revision counter; must stay top-level so it can be
    /// incremented atomically.
    pub revision: u64,
    /// Entity payload minus the revision.
    pub item: Map<String, Value>,
    /// Nested link map: target table name → set of target ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<BTreeMap<String, BTreeSet<String>>>,
    /// Global index value, `"{table}:{value}"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_global: Option<String>,
    /// Tenant-scoped index value, `"{table}:{value}"`, paired with the
    /// partition key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_organisation: Option<String>,
    /// Tombstone flag suppressing lower layers.
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub deleted: bool,
}

impl Row {
    /// Creates an empty live row at revision 0.
    pub fn new(partition: TenantId, sort: impl Into<String>) -> Self {
        Self {
            partition,
            sort: sort.into(),
            revision: 0,
            item: Map::new(),
            links: None,
            secondary_global: None,
            secondary_organisation: None,
            deleted: false,
        }
    }

    /// Creates a tombstone row suppressing this key in lower layers.
    pub fn tombstone(partition: TenantId, sort: impl Into<String>) -> Self {
        let mut row = Self::new(partition, sort);
        row.deleted = true;
        row
    }

    /// Returns this row's primary key.
    pub fn key(&self) -> RowKey {
        RowKey::new(self.partition.clone(), self.sort.clone())
    }
}
