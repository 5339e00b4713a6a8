//! In-memory storage collaborators

mod document;
mod timeseries;

pub use document::MemoryDocumentStore;
pub use timeseries::MemoryTimeseriesStore;
