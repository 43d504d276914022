//! Partitioned row store for StrataDB.
//!
//! Defines the contract any backing provider must implement (batched point
//! gets, partition-scoped sorted queries, two index scans, conditional puts,
//! and atomic link-map updates) plus the in-memory reference provider used by
//! tests and local development.
//!
//! Conditional writes never fail with errors when a condition is unmet; they
//! return an explicit [`WriteOutcome`] so callers can branch on the outcome
//! as a state machine.

pub mod error;
pub mod memory;
pub mod row;
pub mod store;

pub use error::{Error, Result};
pub use memory::{CallCounts, MemoryRowStore};
pub use row::{Row, RowKey};
pub use store::{LinkGuard, LinkOp, LinkUpdate, RowScan, RowStore, WriteCondition, WriteOutcome};
