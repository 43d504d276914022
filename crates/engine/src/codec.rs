//! Entity ↔ row encoding.
//!
//! The row's `item` bag is the entity payload plus the identity metadata the
//! layer needs to rebuild an entity (`id`, `createdAt`, `updatedAt`); those
//! three names are reserved and overwritten on write. `revision` stays a
//! top-level row attribute so it can be incremented atomically, and the link
//! map is stored top-level for the conditional link protocol.

use chrono::{DateTime, Utc};
use serde_json::Value;
use stratadb_store::Row;
use stratadb_types::{Entity, EntitySource, LinkMap, TableRegistry, TenantId, sort_key,
    split_sort_key};

use crate::error::{MissingIdSnafu, Result};

const ID: &str = "id";
const CREATED_AT: &str = "createdAt";
const UPDATED_AT: &str = "updatedAt";

/// Encodes an entity into its primary-layer row under `tenant`.
///
/// The entity must already carry an id; index attributes are derived from the
/// registry's selectors, absent values omitting the attribute entirely.
pub fn encode_entity(
    tenant: &TenantId,
    entity: &Entity,
    registry: &TableRegistry,
) -> Result<Row> {
    let id = entity.id().ok_or_else(|| MissingIdSnafu { table: entity.table.clone() }.build())?;

    let mut item = entity.attributes.clone();
    item.insert(ID.to_string(), Value::String(id.to_string()));
    if let Some(created_at) = entity.created_at {
        item.insert(CREATED_AT.to_string(), Value::String(created_at.to_rfc3339()));
    }
    if let Some(updated_at) = entity.updated_at {
        item.insert(UPDATED_AT.to_string(), Value::String(updated_at.to_rfc3339()));
    }

    let links = entity
        .links
        .iter()
        .map(|(table, ids)| (table.clone(), ids.clone()))
        .collect();

    Ok(Row {
        partition: tenant.clone(),
        sort: sort_key(&entity.table, id),
        revision: entity.revision,
        item,
        // Always present on a full put, even when empty: the link protocol's
        // add-if-present guard keys off the attribute existing.
        links: Some(links),
        secondary_global: registry
            .global_index_value(entity)
            .map(|value| sort_key(&entity.table, &value)),
        secondary_organisation: registry
            .secondary_index_value(entity)
            .map(|value| sort_key(&entity.table, &value)),
        deleted: false,
    })
}

/// Decodes a row read from `layer` back into an entity.
///
/// Returns None for tombstones and rows whose sort key is malformed. The
/// row's partition and layer become the entity's source metadata.
pub fn decode_row(layer: &str, row: &Row) -> Option<Entity> {
    if row.deleted {
        return None;
    }
    let (table, id) = split_sort_key(&row.sort)?;

    let mut attributes = row.item.clone();
    attributes.remove(ID);
    let created_at = attributes.remove(CREATED_AT).and_then(|value| parse_timestamp(&value));
    let updated_at = attributes.remove(UPDATED_AT).and_then(|value| parse_timestamp(&value));

    let links = row
        .links
        .as_ref()
        .map(|map| map.iter().map(|(table, ids)| (table.clone(), ids.clone())).collect())
        .unwrap_or_else(LinkMap::new);

    Some(Entity {
        table: table.to_string(),
        id: Some(id.to_string()),
        revision: row.revision,
        created_at,
        updated_at,
        links,
        attributes,
        source: Some(EntitySource { layer: layer.to_string(), tenant: row.partition.clone() }),
    })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.with_timezone(&Utc))
}
