//! The storage driver contract.
//!
//! A driver is the abstract capability set any backing store must implement.
//! It holds no per-request state and must be safe for concurrent use by many
//! sessions.
//!
//! Link resolution needs to batch further loads through the calling session's
//! entity cache; rather than a circular session↔driver relationship, the
//! session passes a narrow [`KeyLoader`] capability into
//! [`Driver::get_via_links`].

use async_trait::async_trait;
use stratadb_types::{Entity, EntityKey, QueryKey, TenantId};

use crate::error::Result;

/// Narrow batch-loader capability handed to the driver per call.
///
/// Implemented by the session's entity cache so loads triggered during link
/// resolution coalesce with every other pending load.
#[async_trait]
pub trait KeyLoader: Send + Sync {
    /// Loads one entity through the batching cache.
    async fn load(&self, key: EntityKey) -> Result<Option<Entity>>;

    /// Loads many entities through the batching cache, joined positionally.
    async fn load_many(&self, keys: Vec<EntityKey>) -> Result<Vec<Option<Entity>>>;
}

/// Abstract capability set of a storage backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Point lookups: one result per input key, in input order, `None` where
    /// no entity exists. Consults every layer and both the tenant and the
    /// `global` partition.
    async fn get(&self, keys: &[EntityKey]) -> Result<Vec<Option<Entity>>>;

    /// Scoped read of a tenant's entities of one table (plus any living in
    /// the `global` tenant), honoring the key's prefix/cursor/limit filter.
    async fn query(&self, key: &QueryKey) -> Result<Vec<Entity>>;

    /// Cross-tenant index lookup returning candidate entity ids.
    async fn query_global_ids(&self, table: &str, value: &str) -> Result<Vec<String>>;

    /// Tenant-scoped index lookup returning candidate entity ids.
    async fn query_secondary_ids(
        &self,
        table: &str,
        tenant: &TenantId,
        value: &str,
    ) -> Result<Vec<String>>;

    /// Persists an entity, assigning id/timestamps/revision as needed and
    /// enforcing optimistic concurrency.
    async fn put(&self, tenant: &TenantId, entity: Entity) -> Result<Entity>;

    /// Removes an entity: hard-deleted when it was read from the primary
    /// layer, tombstoned otherwise. Dangling-link refusal happens above the
    /// driver, before it is consulted.
    async fn delete(&self, tenant: &TenantId, entity: Entity) -> Result<Entity>;

    /// Removes the entity's id from every linked target's reciprocal set and
    /// clears the in-memory link map. Persisting the now-linkless entity is
    /// the caller's follow-up put.
    async fn delete_links(&self, tenant: &TenantId, entity: Entity) -> Result<Entity>;

    /// Replaces the full set of links from `entity` to `target_table`,
    /// reconciling reciprocal back-links on each added and removed target.
    async fn link(
        &self,
        tenant: &TenantId,
        entity: Entity,
        target_table: &str,
        target_ids: Vec<String>,
    ) -> Result<Entity>;

    /// Resolves the entity's stored link ids of `target_table` through the
    /// caller's batching cache.
    async fn get_via_links(
        &self,
        tenant: &TenantId,
        entity: &Entity,
        target_table: &str,
        loader: &dyn KeyLoader,
    ) -> Result<Vec<Option<Entity>>>;

    /// Generates a fresh entity id.
    fn new_id(&self) -> String;

    /// Hint capping how many keys one logical batch should carry.
    fn max_batch_size(&self) -> usize;
}
