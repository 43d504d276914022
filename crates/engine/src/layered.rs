//! The reference driver: layered entity storage.
//!
//! One backing table per layer, configured base first; the last entry is the
//! primary table and receives every write. Reads fan out to every layer and
//! to both the tenant and `global` partitions, then merge through the
//! flattener: tombstones suppress, the most specific layer wins.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use snafu::{OptionExt, ResultExt};
use stratadb_store::{
    LinkGuard, LinkOp, LinkUpdate, Row, RowKey, RowScan, RowStore, WriteCondition, WriteOutcome,
};
use stratadb_types::{
    Entity, EntityKey, EntitySource, QueryKey, TableRegistry, TenantId, sort_key, split_sort_key,
};
use tracing::debug;

use crate::{
    codec,
    driver::{Driver, KeyLoader},
    error::{
        ConfigSnafu, LinkContentionSnafu, MissingIdSnafu, Result, RevisionConflictSnafu, StoreSnafu,
    },
    flatten::Flattener,
};

/// Generates entity ids at put time.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// The layered entity storage engine.
pub struct LayeredEngine {
    store: Arc<dyn RowStore>,
    registry: Arc<TableRegistry>,
    layers: Vec<String>,
    primary: String,
    id_generator: IdGenerator,
}

impl LayeredEngine {
    /// Creates an engine over the given layer stack, base first; the last
    /// layer is the primary table and receives all writes.
    pub fn new(
        store: Arc<dyn RowStore>,
        registry: Arc<TableRegistry>,
        layers: Vec<String>,
        id_generator: IdGenerator,
    ) -> Result<Self> {
        let primary = layers.last().cloned().context(ConfigSnafu {
            message: "layer stack must not be empty".to_string(),
        })?;
        Ok(Self { store, registry, layers, primary, id_generator })
    }

    /// Returns the primary (write-target) table name.
    pub fn primary(&self) -> &str {
        &self.primary
    }

    fn require_id(entity: &Entity) -> Result<String> {
        entity
            .id()
            .map(str::to_string)
            .ok_or_else(|| MissingIdSnafu { table: entity.table.clone() }.build())
    }

    fn contention_error(key: &RowKey) -> crate::Error {
        let (table, id) = split_sort_key(&key.sort).unwrap_or(("", key.sort.as_str()));
        LinkContentionSnafu { table: table.to_string(), id: id.to_string() }.build()
    }

    /// Applies a link-map mutation with the add-if-present → create-if-absent
    /// → retry-add fallback. The store cannot atomically add-or-create a
    /// nested collection in one conditional expression, so the three steps
    /// cover the map existing, not existing, and being created concurrently
    /// in between.
    async fn converge_links(&self, key: &RowKey, present: LinkOp, absent: LinkOp) -> Result<u64> {
        let attempt =
            LinkUpdate { op: present, guard: LinkGuard::MapExists, bump_revision: true };
        match self
            .store
            .update_links(&self.primary, key, attempt.clone())
            .await
            .context(StoreSnafu)?
        {
            WriteOutcome::Applied { revision } => Ok(revision),
            WriteOutcome::PreconditionMissing | WriteOutcome::Conflict => {
                let create =
                    LinkUpdate { op: absent, guard: LinkGuard::MapAbsent, bump_revision: true };
                match self
                    .store
                    .update_links(&self.primary, key, create)
                    .await
                    .context(StoreSnafu)?
                {
                    WriteOutcome::Applied { revision } => Ok(revision),
                    // A concurrent writer created the map in between; the
                    // original attempt must hold now.
                    WriteOutcome::PreconditionMissing | WriteOutcome::Conflict => {
                        match self
                            .store
                            .update_links(&self.primary, key, attempt)
                            .await
                            .context(StoreSnafu)?
                        {
                            WriteOutcome::Applied { revision } => Ok(revision),
                            _ => Err(Self::contention_error(key)),
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Driver for LayeredEngine {
    async fn get(&self, keys: &[EntityKey]) -> Result<Vec<Option<Entity>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut row_keys = Vec::with_capacity(keys.len() * 2);
        for key in keys {
            // Global first so the tenant copy overrides it within a layer.
            if !key.tenant.is_global() {
                row_keys.push(RowKey::new(TenantId::global(), key.sort_key()));
            }
            row_keys.push(RowKey::new(key.tenant.clone(), key.sort_key()));
        }

        let per_layer = try_join_all(
            self.layers.iter().map(|layer| self.store.batch_get(layer, &row_keys)),
        )
        .await
        .context(StoreSnafu)?;
        let layered: Vec<HashMap<RowKey, Row>> = per_layer
            .into_iter()
            .map(|rows| rows.into_iter().map(|row| (row.key(), row)).collect())
            .collect();

        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            let sort = key.sort_key();
            let mut flattener = Flattener::new();
            for (layer, rows) in self.layers.iter().zip(&layered) {
                if !key.tenant.is_global() {
                    let global = RowKey::new(TenantId::global(), sort.clone());
                    if let Some(row) = rows.get(&global) {
                        flattener.add(layer, row.clone());
                    }
                }
                let local = RowKey::new(key.tenant.clone(), sort.clone());
                if let Some(row) = rows.get(&local) {
                    flattener.add(layer, row.clone());
                }
            }
            resolved.push(flattener.into_entity());
        }
        Ok(resolved)
    }

    async fn query(&self, key: &QueryKey) -> Result<Vec<Entity>> {
        let query = &key.query;
        let scan = RowScan {
            prefix: sort_key(&query.table, query.starts_with.as_deref().unwrap_or("")),
            after: query.after.as_ref().map(|after| sort_key(&query.table, after)),
            limit: query.limit,
        };

        let mut partitions = vec![TenantId::global()];
        if !key.tenant.is_global() {
            partitions.push(key.tenant.clone());
        }

        let scan = &scan;
        let calls = self.layers.iter().flat_map(|layer| {
            partitions.iter().map(move |partition| self.store.query(layer, partition, scan))
        });
        let results = try_join_all(calls).await.context(StoreSnafu)?;

        let mut flattener = Flattener::new();
        let mut results = results.into_iter();
        for layer in &self.layers {
            for _ in &partitions {
                flattener.add_layer(layer, results.next().unwrap_or_default());
            }
        }

        // Physical paging ran per layer independently; enforce the limit a
        // second time over the merged results.
        let mut entities = flattener.entities();
        if let Some(limit) = query.limit {
            entities.truncate(limit);
        }
        Ok(entities)
    }

    async fn query_global_ids(&self, table: &str, value: &str) -> Result<Vec<String>> {
        let value = sort_key(table, value);
        let per_layer = try_join_all(
            self.layers.iter().map(|layer| self.store.query_global_index(layer, &value)),
        )
        .await
        .context(StoreSnafu)?;

        let mut flattener = Flattener::new();
        for (layer, rows) in self.layers.iter().zip(per_layer) {
            flattener.add_layer(layer, rows);
        }
        Ok(flattener.ids())
    }

    async fn query_secondary_ids(
        &self,
        table: &str,
        tenant: &TenantId,
        value: &str,
    ) -> Result<Vec<String>> {
        let value = sort_key(table, value);
        let per_layer = try_join_all(
            self.layers
                .iter()
                .map(|layer| self.store.query_secondary_index(layer, tenant, &value)),
        )
        .await
        .context(StoreSnafu)?;

        // Order-independent union; duplicates across layers collapse.
        let mut ids = BTreeSet::new();
        for sorts in per_layer {
            for sort in sorts {
                if let Some((_, id)) = split_sort_key(&sort) {
                    ids.insert(id.to_string());
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    async fn put(&self, tenant: &TenantId, mut entity: Entity) -> Result<Entity> {
        let now = Utc::now();
        if entity.id.is_none() {
            entity.id = Some((self.id_generator)());
            entity.created_at = Some(now);
        }
        if entity.created_at.is_none() {
            entity.created_at = Some(now);
        }
        entity.updated_at = Some(now);

        let previous = entity.revision;
        entity.revision = previous + 1;

        // The revision check only applies when writing back into the same
        // layer and tenant the entity was read from; cross-layer and
        // cross-tenant writes are environment promotions, not concurrent
        // edits.
        let guarded = match &entity.source {
            None => true,
            Some(source) => source.layer == self.primary && source.tenant == *tenant,
        };
        let condition = if !guarded {
            WriteCondition::None
        } else if previous == 0 {
            WriteCondition::NotExists
        } else {
            WriteCondition::RevisionIs(previous)
        };

        let row = codec::encode_entity(tenant, &entity, &self.registry)?;
        match self.store.put(&self.primary, row, condition).await.context(StoreSnafu)? {
            WriteOutcome::Applied { .. } => {
                entity.source =
                    Some(EntitySource { layer: self.primary.clone(), tenant: tenant.clone() });
                Ok(entity)
            }
            WriteOutcome::Conflict | WriteOutcome::PreconditionMissing => {
                debug!(table = %entity.table, revision = previous, "put lost revision race");
                RevisionConflictSnafu {
                    table: entity.table.clone(),
                    id: entity.id.clone().unwrap_or_default(),
                }
                .fail()
            }
        }
    }

    async fn delete(&self, tenant: &TenantId, entity: Entity) -> Result<Entity> {
        let Some(id) = entity.id() else {
            return Ok(entity);
        };
        let sort = sort_key(&entity.table, id);

        match &entity.source {
            // Read from another tenant's partition (usually global): nothing
            // to delete in this tenant's world.
            Some(source) if source.tenant != *tenant => Ok(entity),
            // Read from a lower layer: suppress it with a tombstone instead
            // of touching the shared table.
            Some(source) if source.layer != self.primary => {
                let row = Row::tombstone(tenant.clone(), sort);
                self.store
                    .put(&self.primary, row, WriteCondition::None)
                    .await
                    .context(StoreSnafu)?;
                Ok(entity)
            }
            _ => {
                let key = RowKey::new(tenant.clone(), sort);
                self.store.delete(&self.primary, &key).await.context(StoreSnafu)?;
                Ok(entity)
            }
        }
    }

    async fn delete_links(&self, tenant: &TenantId, mut entity: Entity) -> Result<Entity> {
        let id = Self::require_id(&entity)?;
        let own_id = BTreeSet::from([id]);

        let removals: Vec<_> = entity
            .links
            .entries()
            .map(|(table, target)| {
                let key = RowKey::new(tenant.clone(), sort_key(table, target));
                let update = LinkUpdate {
                    op: LinkOp::Remove { table: entity.table.clone(), ids: own_id.clone() },
                    guard: LinkGuard::None,
                    bump_revision: false,
                };
                async move { self.store.update_links(&self.primary, &key, update).await }
            })
            .collect();
        try_join_all(removals).await.context(StoreSnafu)?;

        entity.links.clear();
        Ok(entity)
    }

    async fn link(
        &self,
        tenant: &TenantId,
        mut entity: Entity,
        target_table: &str,
        target_ids: Vec<String>,
    ) -> Result<Entity> {
        let id = Self::require_id(&entity)?;
        let source_table = entity.table.clone();
        let own_id = BTreeSet::from([id.clone()]);

        let requested: BTreeSet<String> = target_ids.into_iter().collect();
        let current = entity.links.ids(target_table);
        let to_add: Vec<String> = requested.difference(&current).cloned().collect();
        let to_remove: Vec<String> = current.difference(&requested).cloned().collect();
        debug!(
            table = %source_table,
            target = target_table,
            adding = to_add.len(),
            removing = to_remove.len(),
            "reconciling links"
        );

        let removals: Vec<_> = to_remove
            .into_iter()
            .map(|target| {
                let key = RowKey::new(tenant.clone(), sort_key(target_table, &target));
                let update = LinkUpdate {
                    op: LinkOp::Remove { table: source_table.clone(), ids: own_id.clone() },
                    guard: LinkGuard::None,
                    bump_revision: true,
                };
                async move { self.store.update_links(&self.primary, &key, update).await }
            })
            .collect();
        try_join_all(removals).await.context(StoreSnafu)?;

        let additions: Vec<_> = to_add
            .into_iter()
            .map(|target| {
                let key = RowKey::new(tenant.clone(), sort_key(target_table, &target));
                let present = LinkOp::Add { table: source_table.clone(), ids: own_id.clone() };
                let absent = LinkOp::Init { table: source_table.clone(), ids: own_id.clone() };
                async move { self.converge_links(&key, present, absent).await }
            })
            .collect();
        try_join_all(additions).await?;

        // Our own row last: replace the entry outright and carry the atomic
        // revision increment back onto the entity.
        let own_key = RowKey::new(tenant.clone(), sort_key(&source_table, &id));
        let present = LinkOp::Set { table: target_table.to_string(), ids: requested.clone() };
        let absent = LinkOp::Init { table: target_table.to_string(), ids: requested.clone() };
        let revision = self.converge_links(&own_key, present, absent).await?;

        entity.links.set(target_table, requested);
        entity.revision = revision;
        Ok(entity)
    }

    async fn get_via_links(
        &self,
        tenant: &TenantId,
        entity: &Entity,
        target_table: &str,
        loader: &dyn KeyLoader,
    ) -> Result<Vec<Option<Entity>>> {
        let keys: Vec<EntityKey> = entity
            .links
            .ids(target_table)
            .into_iter()
            .map(|id| EntityKey::new(tenant.clone(), target_table, id))
            .collect();
        loader.load_many(keys).await
    }

    fn new_id(&self) -> String {
        (self.id_generator)()
    }

    fn max_batch_size(&self) -> usize {
        // One logical batch fans out to one physical call per layer.
        (self.store.batch_limit() / self.layers.len()).max(1)
    }
}
