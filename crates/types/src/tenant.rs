//! Tenant identifiers.
//!
//! Tenants are the isolation boundary for entities. The reserved literal
//! tenant `global` holds rows visible to every tenant: point lookups and
//! scoped queries always probe both the caller's tenant partition and the
//! global partition.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The reserved partition visible to every tenant.
const GLOBAL: &str = "global";

/// Identifier for a tenant (the partition key of every row).
///
/// Wraps the external tenant string with type safety so tenant ids cannot be
/// mixed up with entity ids or table names.
///
/// # Display
///
/// Formats as the raw tenant string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant id from a raw string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the reserved cross-tenant id.
    pub fn global() -> Self {
        Self(GLOBAL.to_string())
    }

    /// Returns true if this is the reserved cross-tenant id.
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL
    }

    /// Returns the raw tenant string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
