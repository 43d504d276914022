//! Store error types.

use snafu::Snafu;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`RowStore`](crate::store::RowStore) implementations.
///
/// `Clone` so results can be fanned out to multiple waiters of a coalesced
/// lookup.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The named backing table is not part of the configured layer stack.
    #[snafu(display("table '{table}' does not exist"))]
    TableMissing {
        /// The unknown table name.
        table: String,
    },

    /// The provider failed (network, throttling, malformed data).
    #[snafu(display("store unavailable: {message}"))]
    Unavailable {
        /// Provider failure description.
        message: String,
    },
}
