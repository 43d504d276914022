//! Layer-stack merge.
//!
//! Rows are added in configured layer order, base first. A tombstone for a
//! sort key suppresses that key outright, regardless of live copies in any
//! layer; otherwise the last layer added (the most specific override) wins.
//! Within one layer, callers add `global`-partition rows before
//! tenant-partition rows so the tenant copy takes precedence.

use std::collections::BTreeMap;

use stratadb_store::Row;
use stratadb_types::{Entity, split_sort_key};

use crate::codec::decode_row;

enum Slot {
    Suppressed,
    Live { layer: String, row: Row },
}

/// Merges candidate rows across the layer stack.
pub(crate) struct Flattener {
    slots: BTreeMap<String, Slot>,
}

impl Flattener {
    pub(crate) fn new() -> Self {
        Self { slots: BTreeMap::new() }
    }

    /// Adds one candidate row from `layer`.
    pub(crate) fn add(&mut self, layer: &str, row: Row) {
        if matches!(self.slots.get(&row.sort), Some(Slot::Suppressed)) {
            return;
        }
        let sort = row.sort.clone();
        let slot = if row.deleted {
            Slot::Suppressed
        } else {
            Slot::Live { layer: layer.to_string(), row }
        };
        self.slots.insert(sort, slot);
    }

    /// Adds a batch of candidate rows from `layer`.
    pub(crate) fn add_layer(&mut self, layer: &str, rows: impl IntoIterator<Item = Row>) {
        for row in rows {
            self.add(layer, row);
        }
    }

    /// Resolves the merge to entities, in sort-key order.
    pub(crate) fn entities(self) -> Vec<Entity> {
        self.slots
            .into_values()
            .filter_map(|slot| match slot {
                Slot::Suppressed => None,
                Slot::Live { layer, row } => decode_row(&layer, &row),
            })
            .collect()
    }

    /// Resolves the merge of a single key's candidates.
    pub(crate) fn into_entity(self) -> Option<Entity> {
        self.entities().into_iter().next()
    }

    /// Resolves the merge to surviving entity ids, in sort-key order.
    pub(crate) fn ids(self) -> Vec<String> {
        self.slots
            .into_iter()
            .filter_map(|(sort, slot)| match slot {
                Slot::Suppressed => None,
                Slot::Live { .. } => split_sort_key(&sort).map(|(_, id)| id.to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::Value;
    use stratadb_types::TenantId;

    use super::*;

    fn named_row(tenant: &str, sort: &str, name: &str) -> Row {
        let mut row = Row::new(TenantId::new(tenant), sort);
        row.item.insert("id".to_string(), Value::String(sort.split(':').nth(1).unwrap().into()));
        row.item.insert("name".to_string(), Value::String(name.into()));
        row
    }

    #[test]
    fn test_last_layer_wins() {
        let mut flattener = Flattener::new();
        flattener.add("base", named_row("t", "users:u-1", "garry"));
        flattener.add("override", named_row("t", "users:u-1", "barry"));

        let entity = flattener.into_entity().expect("live entity");
        assert_eq!(entity.string_attribute("name"), Some("barry"));
        assert_eq!(entity.source.expect("source").layer, "override");
    }

    #[test]
    fn test_tombstone_suppresses_every_copy() {
        let mut flattener = Flattener::new();
        flattener.add("base", named_row("t", "users:u-1", "garry"));
        flattener.add("override", Row::tombstone(TenantId::new("t"), "users:u-1"));
        assert!(flattener.into_entity().is_none());

        // Order independence: tombstone first still wins.
        let mut flattener = Flattener::new();
        flattener.add("base", Row::tombstone(TenantId::new("t"), "users:u-1"));
        flattener.add("override", named_row("t", "users:u-1", "garry"));
        assert!(flattener.into_entity().is_none());
    }

    #[test]
    fn test_distinct_keys_keep_their_own_winners() {
        let mut flattener = Flattener::new();
        flattener.add_layer(
            "base",
            [named_row("t", "users:u-1", "garry"), named_row("t", "users:u-2", "barry")],
        );
        flattener.add("override", Row::tombstone(TenantId::new("t"), "users:u-2"));

        let entities = flattener.entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id(), Some("u-1"));
    }

    #[test]
    fn test_ids_parse_sort_keys() {
        let mut flattener = Flattener::new();
        flattener.add("base", named_row("t", "users:u-2", "barry"));
        flattener.add("base", named_row("t", "users:u-1", "garry"));
        assert_eq!(flattener.ids(), ["u-1", "u-2"]);
    }
}
