//! Batching and caching keys.
//!
//! Keys are immutable value objects created per call. Two point-lookup keys
//! are equal iff tenant, table, and id all match; two query keys are equal
//! iff tenant, table, and the whole filter match, so queries with different
//! filters never share a cache slot.
//!
//! Sort-key format: `{table}:{id}`.

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// Builds the physical sort key for an entity row.
pub fn sort_key(table: &str, id: &str) -> String {
    format!("{table}:{id}")
}

/// Splits a sort key back into (table, id).
///
/// Returns None if the separator is missing. The id may itself contain `:`;
/// only the first separator splits.
pub fn split_sort_key(sort: &str) -> Option<(&str, &str)> {
    sort.split_once(':')
}

/// Identifies one entity fetch: (tenant, table, id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Tenant the lookup runs under.
    pub tenant: TenantId,
    /// Table name of the entity's type.
    pub table: String,
    /// Entity id within (tenant, table).
    pub id: String,
}

impl EntityKey {
    /// Creates a point-lookup key.
    pub fn new(tenant: TenantId, table: impl Into<String>, id: impl Into<String>) -> Self {
        Self { tenant, table: table.into(), id: id.into() }
    }

    /// Returns the physical sort key for this lookup.
    pub fn sort_key(&self) -> String {
        sort_key(&self.table, &self.id)
    }
}

/// A scoped query over one table: optional id-prefix, pagination cursor, and
/// result limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Builder, Serialize, Deserialize)]
pub struct Query {
    /// Table name the query scans.
    #[builder(into)]
    pub table: String,
    /// Only ids starting with this prefix are returned.
    #[builder(into)]
    pub starts_with: Option<String>,
    /// Resume strictly after this id.
    #[builder(into)]
    pub after: Option<String>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl Query {
    /// A whole-table query with no filter.
    pub fn all(table: impl Into<String>) -> Self {
        Self { table: table.into(), starts_with: None, after: None, limit: None }
    }
}

/// Identifies one scoped query: (tenant, query filter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    /// Tenant the query runs under.
    pub tenant: TenantId,
    /// Table and filter.
    pub query: Query,
}

impl QueryKey {
    /// Creates a query key.
    pub fn new(tenant: TenantId, query: Query) -> Self {
        Self { tenant, query }
    }
}
