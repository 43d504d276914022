//! Shared test fixtures for StrataDB crates.
//!
//! The fixture type is `simpletables`: a record with a `name` attribute
//! behind the tenant-scoped secondary index and a `globalLookup` attribute
//! behind the cross-tenant global index.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use stratadb_types::{Entity, TableDescriptor, TableRegistry};

/// Registry with the `simpletables` fixture type registered.
pub fn fixture_registry() -> TableRegistry {
    let mut registry = TableRegistry::new();
    registry.register(
        TableDescriptor::for_type("SimpleTable")
            .with_global_index(|e| e.string_attribute("globalLookup").map(str::to_string))
            .with_secondary_index(|e| e.string_attribute("name").map(str::to_string)),
    );
    registry
}

/// A fresh `simpletables` entity with the two indexed attributes set.
pub fn simple_entity(name: &str, global_lookup: &str) -> Entity {
    let mut entity = Entity::new("simpletables");
    entity.set_attribute("name", name);
    entity.set_attribute("globalLookup", global_lookup);
    entity
}

/// Deterministic id generator: `{prefix}-1`, `{prefix}-2`, ...
pub fn sequential_ids(prefix: &str) -> Arc<dyn Fn() -> String + Send + Sync> {
    let prefix = prefix.to_string();
    let counter = AtomicU64::new(0);
    Arc::new(move || format!("{prefix}-{}", counter.fetch_add(1, Ordering::Relaxed) + 1))
}
