//! Static per-type table registry.
//!
//! Each entity type is registered once at startup with its table name and its
//! optional index selectors. Lookups at runtime are plain map reads; no type
//! introspection is involved.
//!
//! A type declares at most one global index and one tenant-scoped secondary
//! index. Selectors derive the indexed value from the entity's attribute bag;
//! returning None omits the index attribute on write.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::entity::Entity;

/// Derives an index value from an entity; None omits the index entirely.
pub type IndexSelector = Arc<dyn Fn(&Entity) -> Option<String> + Send + Sync>;

/// Resolves the default table name for a type: lower-cased with a trailing
/// pluralizing `s`.
pub fn default_table_name(type_name: &str) -> String {
    let mut name = type_name.to_lowercase();
    name.push('s');
    name
}

/// Per-type registration: table name plus optional index selectors.
#[derive(Clone)]
pub struct TableDescriptor {
    table: String,
    global_index: Option<IndexSelector>,
    secondary_index: Option<IndexSelector>,
}

impl TableDescriptor {
    /// Creates a descriptor with an explicitly declared table name.
    pub fn named(table: impl Into<String>) -> Self {
        Self { table: table.into(), global_index: None, secondary_index: None }
    }

    /// Creates a descriptor for a type name using the default naming rule.
    pub fn for_type(type_name: &str) -> Self {
        Self::named(default_table_name(type_name))
    }

    /// Declares the cross-tenant global index selector.
    pub fn with_global_index(
        mut self,
        selector: impl Fn(&Entity) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.global_index = Some(Arc::new(selector));
        self
    }

    /// Declares the tenant-scoped secondary index selector.
    pub fn with_secondary_index(
        mut self,
        selector: impl Fn(&Entity) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.secondary_index = Some(Arc::new(selector));
        self
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Evaluates the global index selector against an entity.
    pub fn global_index_value(&self, entity: &Entity) -> Option<String> {
        self.global_index.as_ref().and_then(|selector| selector(entity))
    }

    /// Evaluates the secondary index selector against an entity.
    pub fn secondary_index_value(&self, entity: &Entity) -> Option<String> {
        self.secondary_index.as_ref().and_then(|selector| selector(entity))
    }
}

impl fmt::Debug for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("table", &self.table)
            .field("global_index", &self.global_index.is_some())
            .field("secondary_index", &self.secondary_index.is_some())
            .finish()
    }
}

/// Registry of every entity type known to the store, resolved at startup.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, TableDescriptor>,
}

impl TableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type descriptor, keyed by its table name.
    pub fn register(&mut self, descriptor: TableDescriptor) -> &mut Self {
        self.tables.insert(descriptor.table.clone(), descriptor);
        self
    }

    /// Returns the descriptor for a table, if registered.
    pub fn descriptor(&self, table: &str) -> Option<&TableDescriptor> {
        self.tables.get(table)
    }

    /// Evaluates the global index value for an entity, if its type declares one.
    pub fn global_index_value(&self, entity: &Entity) -> Option<String> {
        self.descriptor(&entity.table).and_then(|d| d.global_index_value(entity))
    }

    /// Evaluates the secondary index value for an entity, if its type declares one.
    pub fn secondary_index_value(&self, entity: &Entity) -> Option<String> {
        self.descriptor(&entity.table).and_then(|d| d.secondary_index_value(entity))
    }
}
