//! Engine error types.

use snafu::Snafu;

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`Driver`](crate::driver::Driver) implementations.
///
/// `Clone` so a single failure can be handed to every waiter of a coalesced
/// lookup. [`Error::RevisionConflict`] is distinct from other failures so
/// callers can choose to retry with fresh data; the engine itself never
/// retries it.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The underlying row store failed.
    #[snafu(display("storage operation failed: {source}"))]
    Store {
        /// The provider failure.
        source: stratadb_store::Error,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// An optimistic-concurrency condition failed on a write.
    #[snafu(display("revision mismatch writing {table}:{id}"))]
    RevisionConflict {
        /// Table of the conflicting entity.
        table: String,
        /// Id of the conflicting entity.
        id: String,
    },

    /// The add-if-present / create-if-absent / retry-add link protocol
    /// exhausted its steps without applying.
    #[snafu(display("link update on {table}:{id} lost its conditional races"))]
    LinkContention {
        /// Table of the contended row.
        table: String,
        /// Id of the contended row.
        id: String,
    },

    /// A mutation was attempted on an entity that has never been assigned an
    /// id.
    #[snafu(display("{table} entity has no id"))]
    MissingId {
        /// Table of the entity.
        table: String,
    },

    /// The engine was configured with an invalid layer stack.
    #[snafu(display("invalid engine configuration: {message}"))]
    Config {
        /// What was wrong.
        message: String,
    },
}

impl Error {
    /// Returns true for optimistic-concurrency failures.
    pub fn is_revision_conflict(&self) -> bool {
        matches!(self, Error::RevisionConflict { .. })
    }
}
