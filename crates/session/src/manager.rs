//! Session bootstrap.
//!
//! The manager owns the engine and vends per-tenant sessions. Configuration
//! is built once at startup: the layer stack (base first, last entry the
//! primary write target) and an optional id generator, defaulting to random
//! UUIDs.

use std::sync::Arc;

use snafu::ResultExt;
use stratadb_engine::{Driver, IdGenerator, LayeredEngine};
use stratadb_store::RowStore;
use stratadb_types::{TableRegistry, TenantId};

use crate::{
    error::{DriverSnafu, Result},
    session::{Session, WritePermission, allow_all},
};

/// Startup configuration for a [`SessionManager`].
#[derive(bon::Builder)]
pub struct ManagerConfig {
    /// Layer tables, base first; the last entry receives all writes. Must not
    /// be empty.
    pub layers: Vec<String>,
    /// Generates ids for entities persisted without one; defaults to random
    /// UUIDs.
    pub id_generator: Option<IdGenerator>,
}

/// Builds the engine once and vends per-tenant sessions.
pub struct SessionManager {
    driver: Arc<dyn Driver>,
}

impl SessionManager {
    /// Wires the layered engine over `store` with the registered types.
    pub fn new(
        store: Arc<dyn RowStore>,
        registry: TableRegistry,
        config: ManagerConfig,
    ) -> Result<Self> {
        let id_generator = config
            .id_generator
            .unwrap_or_else(|| Arc::new(|| uuid::Uuid::new_v4().to_string()));
        let engine = LayeredEngine::new(store, Arc::new(registry), config.layers, id_generator)
            .context(DriverSnafu)?;
        Ok(Self { driver: Arc::new(engine) })
    }

    /// Wraps an already-built driver; used with alternative backends and test
    /// doubles.
    pub fn with_driver(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// A session for `tenant` approving every write.
    pub fn session(&self, tenant: impl Into<TenantId>) -> Session {
        self.session_with_permission(tenant, allow_all())
    }

    /// A session for `tenant` gated by the given permission predicate.
    pub fn session_with_permission(
        &self,
        tenant: impl Into<TenantId>,
        permission: WritePermission,
    ) -> Session {
        Session::new(tenant.into(), Arc::clone(&self.driver), permission)
    }

    /// Generates a fresh entity id.
    pub fn new_id(&self) -> String {
        self.driver.new_id()
    }
}
