//! Entities and their link multimaps.
//!
//! An entity is a typed record belonging to exactly one tenant (or the
//! reserved `global` tenant). The payload is an opaque attribute bag owned by
//! the caller's type system; the storage layer only manages identity,
//! revision, timestamps, links, and read-source metadata.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{key::EntityKey, tenant::TenantId};

/// Where an entity was physically read from.
///
/// Recorded on every read so a later write can decide whether optimistic
/// concurrency applies: a write into a different layer or tenant than the one
/// the entity came from is an environment promotion, not a concurrent edit,
/// and skips the revision check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySource {
    /// Backing table the winning row came from.
    pub layer: String,
    /// Tenant partition the winning row came from.
    pub tenant: TenantId,
}

/// Outbound relationships of an entity: target table name → set of target ids.
///
/// Relationships are stored redundantly on both endpoints; the driver keeps
/// the reciprocal sides consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkMap(BTreeMap<String, BTreeSet<String>>);

impl LinkMap {
    /// Creates an empty link map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the target ids linked under `table`, if any.
    pub fn get(&self, table: &str) -> Option<&BTreeSet<String>> {
        self.0.get(table)
    }

    /// Returns the target ids linked under `table`, cloned; empty when absent.
    pub fn ids(&self, table: &str) -> BTreeSet<String> {
        self.0.get(table).cloned().unwrap_or_default()
    }

    /// Replaces the id set under `table`; an empty set removes the entry.
    pub fn set(&mut self, table: impl Into<String>, ids: BTreeSet<String>) {
        let table = table.into();
        if ids.is_empty() {
            self.0.remove(&table);
        } else {
            self.0.insert(table, ids);
        }
    }

    /// Adds a single id under `table`.
    pub fn insert(&mut self, table: impl Into<String>, id: impl Into<String>) {
        self.0.entry(table.into()).or_default().insert(id.into());
    }

    /// Removes a single id under `table`, dropping the entry when it empties.
    pub fn remove(&mut self, table: &str, id: &str) {
        if let Some(ids) = self.0.get_mut(table) {
            ids.remove(id);
            if ids.is_empty() {
                self.0.remove(table);
            }
        }
    }

    /// Returns true if `table` links to `id`.
    pub fn contains(&self, table: &str, id: &str) -> bool {
        self.0.get(table).is_some_and(|ids| ids.contains(id))
    }

    /// Returns true when no links are present at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterates over (target table, id set) entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    /// Iterates over every (target table, target id) pair.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter().flat_map(|(table, ids)| ids.iter().map(move |id| (table, id)))
    }
}

impl FromIterator<(String, BTreeSet<String>)> for LinkMap {
    fn from_iter<I: IntoIterator<Item = (String, BTreeSet<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().filter(|(_, ids)| !ids.is_empty()).collect())
    }
}

/// A typed record in the store.
///
/// `revision`, `created_at`, `updated_at`, and `source` are driver-assigned;
/// callers only populate `table`, `attributes`, and optionally `id` before the
/// first put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable table name of the entity's type.
    pub table: String,
    /// Tenant+table unique identifier; None until assigned at first put.
    pub id: Option<String>,
    /// Optimistic-concurrency counter; 0 means not yet persisted.
    pub revision: u64,
    /// Set by the driver on first persist.
    pub created_at: Option<DateTime<Utc>>,
    /// Set by the driver on every persist.
    pub updated_at: Option<DateTime<Utc>>,
    /// Outbound relationships, maintained by the driver's link operations.
    pub links: LinkMap,
    /// Opaque attribute bag owned by the caller.
    pub attributes: Map<String, Value>,
    /// Layer and tenant the entity was read from; None until first read/write.
    pub source: Option<EntitySource>,
}

impl Entity {
    /// Creates a fresh, unpersisted entity of the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: None,
            revision: 0,
            created_at: None,
            updated_at: None,
            links: LinkMap::new(),
            attributes: Map::new(),
            source: None,
        }
    }

    /// Creates a fresh entity with a caller-chosen id.
    pub fn with_id(table: impl Into<String>, id: impl Into<String>) -> Self {
        let mut entity = Self::new(table);
        entity.id = Some(id.into());
        entity
    }

    /// Returns the id, or None when the entity has never been persisted.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns an attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns a string attribute by name, if present and a string.
    pub fn string_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// Sets an attribute value, returning self for chaining at construction.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Returns the batching/caching key of this entity under `tenant`.
    ///
    /// None when the entity has no id yet.
    pub fn key(&self, tenant: &TenantId) -> Option<EntityKey> {
        self.id.as_ref().map(|id| EntityKey::new(tenant.clone(), &self.table, id))
    }
}
