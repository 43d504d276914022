//! Session error types.
//!
//! Every failure surfaces through the same asynchronous channel as results;
//! the session performs no logging or suppression of its own. Errors are
//! `Clone` because one failure may be handed to every waiter of a coalesced
//! lookup.

use snafu::Snafu;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`Session`](crate::session::Session) operations.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The permission predicate rejected a mutation; nothing was written and
    /// no cache slot was evicted.
    #[snafu(display("write not allowed for {table} with id {id}"))]
    ForbiddenWrite {
        /// Table of the rejected entity.
        table: String,
        /// Id of the rejected entity.
        id: String,
    },

    /// Plain delete of an entity whose link set is non-empty.
    #[snafu(display("deleting {table}:{id} would leave dangling links"))]
    DanglingLinks {
        /// Table of the entity.
        table: String,
        /// Id of the entity.
        id: String,
    },

    /// A unique link/index lookup resolved to more than one entity.
    #[snafu(display("expected a single {table} linkage, found {count}"))]
    MultipleResults {
        /// Table the lookup ran against.
        table: String,
        /// Number of entities that matched.
        count: usize,
    },

    /// The session was dropped before a pending load resolved.
    #[snafu(display("load dropped before completion"))]
    Dropped,

    /// The driver failed; revision conflicts arrive through here, distinct
    /// and never auto-retried.
    #[snafu(display("{source}"))]
    Driver {
        /// The driver failure.
        source: stratadb_engine::Error,
    },
}

impl Error {
    /// Returns true when the failure is an optimistic-concurrency conflict
    /// the caller may retry with fresh data.
    pub fn is_revision_conflict(&self) -> bool {
        matches!(self, Error::Driver { source } if source.is_revision_conflict())
    }
}
