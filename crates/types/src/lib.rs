//! Core types for StrataDB.
//!
//! This crate provides the foundational value types used throughout the
//! storage layer:
//! - Tenant identifiers with the reserved cross-tenant `global` value
//! - Entities with their link multimaps and opaque attribute payloads
//! - Batching/caching keys for point lookups and scoped queries
//! - The static table registry resolving table names and index selectors

pub mod entity;
pub mod key;
pub mod registry;
pub mod tenant;

// Re-export commonly used types at crate root
pub use entity::{Entity, EntitySource, LinkMap};
pub use key::{EntityKey, Query, QueryKey, sort_key, split_sort_key};
pub use registry::{IndexSelector, TableDescriptor, TableRegistry, default_table_name};
pub use tenant::TenantId;
