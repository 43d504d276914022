//! The session façade.
//!
//! Public entity/link/query operations over the driver, coupled to the two
//! caches. Every mutation consults the permission predicate first; denial
//! fails the operation before any eviction or driver call. On approval the
//! affected entity-cache slots and every query-cache slot of the affected
//! tables are evicted, then the driver is called.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use futures::future::{BoxFuture, join_all};
use snafu::{IntoError, ResultExt, ensure};
use stratadb_engine::{Driver, KeyLoader};
use stratadb_types::{Entity, EntityKey, Query, QueryKey, TenantId};

use crate::{
    error::{DanglingLinksSnafu, DriverSnafu, ForbiddenWriteSnafu, MultipleResultsSnafu, Result},
    loader::EntityLoader,
    query_cache::QueryCache,
};

/// Permission predicate consulted before every mutating operation.
pub type WritePermission = Arc<dyn Fn(&Entity) -> BoxFuture<'static, bool> + Send + Sync>;

/// A permission predicate approving every write.
pub fn allow_all() -> WritePermission {
    Arc::new(|_| Box::pin(async { true }))
}

/// Per-request batching/caching façade over a driver.
///
/// Construct one per tenant context through
/// [`SessionManager`](crate::manager::SessionManager); a session's caches are
/// mutated only by operations issued through it and must not be shared across
/// tenants or unrelated concurrent top-level requests.
pub struct Session {
    tenant: TenantId,
    driver: Arc<dyn Driver>,
    pub(crate) entities: Arc<EntityLoader>,
    queries: Arc<QueryCache>,
    permission: WritePermission,
}

/// The narrow batch-loader capability handed to the driver for link
/// resolution; loads coalesce with everything else pending in the session.
struct CacheLoader {
    entities: Arc<EntityLoader>,
}

fn to_driver_error(error: crate::Error) -> stratadb_engine::Error {
    match error {
        crate::Error::Driver { source } => source,
        other => stratadb_engine::error::StoreSnafu
            .into_error(stratadb_store::error::UnavailableSnafu { message: other.to_string() }
                .build()),
    }
}

#[async_trait]
impl KeyLoader for CacheLoader {
    async fn load(&self, key: EntityKey) -> stratadb_engine::Result<Option<Entity>> {
        self.entities.load(key).await.map_err(to_driver_error)
    }

    async fn load_many(&self, keys: Vec<EntityKey>) -> stratadb_engine::Result<Vec<Option<Entity>>> {
        let loads: Vec<_> = keys.into_iter().map(|key| self.entities.load(key)).collect();
        join_all(loads).await.into_iter().map(|result| result.map_err(to_driver_error)).collect()
    }
}

impl Session {
    pub(crate) fn new(
        tenant: TenantId,
        driver: Arc<dyn Driver>,
        permission: WritePermission,
    ) -> Self {
        let queries = Arc::new(QueryCache::new(Arc::clone(&driver)));
        Self { tenant, driver, entities: Arc::new(EntityLoader::new()), queries, permission }
    }

    /// The tenant this session operates under.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Generates a fresh entity id.
    pub fn new_id(&self) -> String {
        self.driver.new_id()
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Fetches one entity through the entity cache.
    ///
    /// Like every read, the returned future settles only while
    /// [`Session::run`] drives the session.
    pub async fn get(&self, table: &str, id: &str) -> Result<Option<Entity>> {
        self.entities.load(EntityKey::new(self.tenant.clone(), table, id)).await
    }

    /// Fetches many entities, joined positionally; an empty id list yields an
    /// empty result without touching the driver.
    pub async fn get_many(&self, table: &str, ids: &[String]) -> Result<Vec<Option<Entity>>> {
        let loads: Vec<_> = ids
            .iter()
            .map(|id| self.entities.load(EntityKey::new(self.tenant.clone(), table, id)))
            .collect();
        join_all(loads).await.into_iter().collect()
    }

    /// Whole-table scoped query, memoized per (tenant, table).
    pub async fn query(&self, table: &str) -> Result<Vec<Entity>> {
        self.query_where(Query::all(table)).await
    }

    /// Filtered scoped query, memoized per (tenant, table, filter).
    pub async fn query_where(&self, query: Query) -> Result<Vec<Entity>> {
        self.queries.load(QueryKey::new(self.tenant.clone(), query)).await
    }

    /// Cross-tenant index lookup, candidates resolved through the entity
    /// cache.
    pub async fn query_global(&self, table: &str, value: &str) -> Result<Vec<Entity>> {
        let ids = self.driver.query_global_ids(table, value).await.context(DriverSnafu)?;
        let found = self.get_many(table, &ids).await?;
        Ok(found.into_iter().flatten().collect())
    }

    /// Like [`Session::query_global`] but asserts at most one match.
    pub async fn query_global_unique(&self, table: &str, value: &str) -> Result<Option<Entity>> {
        let items = self.query_global(table, value).await?;
        ensure!(
            items.len() <= 1,
            MultipleResultsSnafu { table: table.to_string(), count: items.len() }
        );
        Ok(items.into_iter().next())
    }

    /// Tenant-scoped index lookup, candidates resolved through the entity
    /// cache.
    pub async fn query_secondary(&self, table: &str, value: &str) -> Result<Vec<Entity>> {
        let ids = self
            .driver
            .query_secondary_ids(table, &self.tenant, value)
            .await
            .context(DriverSnafu)?;
        let found = self.get_many(table, &ids).await?;
        Ok(found.into_iter().flatten().collect())
    }

    /// Like [`Session::query_secondary`] but asserts at most one match.
    pub async fn query_secondary_unique(&self, table: &str, value: &str) -> Result<Option<Entity>> {
        let items = self.query_secondary(table, value).await?;
        ensure!(
            items.len() <= 1,
            MultipleResultsSnafu { table: table.to_string(), count: items.len() }
        );
        Ok(items.into_iter().next())
    }

    /// Resolves the entity's stored links of `target_table` through the
    /// entity cache.
    pub async fn get_links(&self, entity: &Entity, target_table: &str) -> Result<Vec<Entity>> {
        let loader = CacheLoader { entities: Arc::clone(&self.entities) };
        let found = self
            .driver
            .get_via_links(&self.tenant, entity, target_table, &loader)
            .await
            .context(DriverSnafu)?;
        Ok(found.into_iter().flatten().collect())
    }

    /// Resolves a link expected to hold zero or one target; more is a
    /// data-integrity failure.
    pub async fn get_link(&self, entity: &Entity, target_table: &str) -> Result<Option<Entity>> {
        let items = self.get_links(entity, target_table).await?;
        ensure!(
            items.len() <= 1,
            MultipleResultsSnafu { table: target_table.to_string(), count: items.len() }
        );
        Ok(items.into_iter().next())
    }

    /// The raw stored link ids of `target_table`, no loads issued.
    pub fn link_ids(&self, entity: &Entity, target_table: &str) -> BTreeSet<String> {
        entity.links.ids(target_table)
    }

    async fn allowed(&self, entity: &Entity) -> Result<()> {
        if (self.permission)(entity).await {
            Ok(())
        } else {
            ForbiddenWriteSnafu {
                table: entity.table.clone(),
                id: entity.id().unwrap_or("<new>").to_string(),
            }
            .fail()
        }
    }

    fn evict_for_write(&self, entity: &Entity, tenant: &TenantId) {
        if let Some(id) = entity.id() {
            self.entities.invalidate(&EntityKey::new(tenant.clone(), &entity.table, id));
        }
        self.queries.invalidate_table(tenant, &entity.table);
    }

    /// Persists an entity under this session's tenant.
    pub async fn put(&self, entity: Entity) -> Result<Entity> {
        self.allowed(&entity).await?;
        self.evict_for_write(&entity, &self.tenant);
        self.driver.put(&self.tenant, entity).await.context(DriverSnafu)
    }

    /// Persists an entity under the reserved `global` tenant, making it
    /// visible to every tenant.
    pub async fn put_global(&self, entity: Entity) -> Result<Entity> {
        self.allowed(&entity).await?;
        let global = TenantId::global();
        self.evict_for_write(&entity, &global);
        self.driver.put(&global, entity).await.context(DriverSnafu)
    }

    /// Removes an entity. Without `cascade` the delete refuses while the
    /// entity still links anywhere; with it, reciprocal links are removed and
    /// the linkless entity re-persisted before the delete itself.
    pub async fn delete(&self, entity: Entity, cascade: bool) -> Result<Entity> {
        if !cascade && !entity.links.is_empty() {
            return DanglingLinksSnafu {
                table: entity.table.clone(),
                id: entity.id().unwrap_or("<new>").to_string(),
            }
            .fail();
        }
        self.allowed(&entity).await?;
        self.evict_for_write(&entity, &self.tenant);

        if cascade {
            let entity = self.delete_links(entity).await?;
            self.driver.delete(&self.tenant, entity).await.context(DriverSnafu)
        } else {
            self.driver.delete(&self.tenant, entity).await.context(DriverSnafu)
        }
    }

    /// Removes the entity's back-references from every linked target, then
    /// clears and re-persists the entity's own link set.
    pub async fn delete_links(&self, entity: Entity) -> Result<Entity> {
        self.allowed(&entity).await?;
        let entity = self.driver.delete_links(&self.tenant, entity).await.context(DriverSnafu)?;
        self.put(entity).await
    }

    /// Replaces the full set of links from `entity` to `target_table`,
    /// keeping reciprocal back-links consistent.
    pub async fn link(
        &self,
        entity: Entity,
        target_table: &str,
        target_ids: Vec<String>,
    ) -> Result<Entity> {
        self.allowed(&entity).await?;
        self.evict_for_write(&entity, &self.tenant);
        for target in &target_ids {
            self.entities.invalidate(&EntityKey::new(self.tenant.clone(), target_table, target));
        }
        self.queries.invalidate_table(&self.tenant, target_table);
        self.driver.link(&self.tenant, entity, target_table, target_ids).await.context(DriverSnafu)
    }

    /// Links to a single target, or clears the link set entirely on `None`.
    pub async fn link_single(
        &self,
        entity: Entity,
        target_table: &str,
        target_id: Option<String>,
    ) -> Result<Entity> {
        self.link(entity, target_table, target_id.into_iter().collect()).await
    }
}
