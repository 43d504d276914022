//! Layered entity storage engine for StrataDB.
//!
//! Defines the driver contract consumed by the session layer and provides the
//! reference implementation: entities encoded into a single-table-per-layer
//! row format, reads resolved across the layer stack, optimistic concurrency
//! on writes, bidirectional links maintained through conditional single-row
//! updates, and two emulated index families.

pub mod codec;
pub mod driver;
pub mod error;
mod flatten;
pub mod layered;

pub use driver::{Driver, KeyLoader};
pub use error::{Error, Result};
pub use layered::{IdGenerator, LayeredEngine};
