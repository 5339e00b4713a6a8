//! vss-handlers - Storage-backed handlers for the VSS gateway
//!
//! Two handler variants are provided:
//! - [`DocumentHandler`] for stores with a change feed, backed by a
//!   [`PushRegistry`]
//! - [`TimeseriesHandler`] for pull-only stores, backed by a [`PollRegistry`]

mod common;
pub mod document;
pub mod memory;
pub mod subscription;
pub mod timeseries;

#[cfg(test)]
pub(crate) mod testing;

pub use document::{DocumentHandler, DocumentHandlerFactory};
pub use memory::{MemoryDocumentStore, MemoryTimeseriesStore};
pub use subscription::{PollRegistry, PushRegistry, DEFAULT_POLL_INTERVAL};
pub use timeseries::{TimeseriesHandler, TimeseriesHandlerFactory};
