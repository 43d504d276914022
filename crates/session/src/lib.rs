//! Request-scoped batching/caching session for StrataDB.
//!
//! One [`Session`] is constructed per tenant context. It wraps a
//! [`Driver`](stratadb_engine::Driver) with two coalescing caches (a
//! batching entity cache and a memoizing query cache), exposes the public
//! entity/link/query operations with permission gating and cache
//! invalidation, and drives a cooperative dispatch loop that flushes pending
//! batches until a target computation completes.
//!
//! Sessions are not shared across tenants or unrelated top-level requests;
//! the driver underneath is, and holds no per-request state.

mod dispatch;
pub mod error;
mod loader;
pub mod manager;
mod query_cache;
pub mod session;

pub use error::{Error, Result};
pub use manager::{ManagerConfig, SessionManager};
pub use session::{Session, WritePermission, allow_all};
