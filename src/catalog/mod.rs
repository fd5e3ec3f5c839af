//! Dataset discovery and download

pub mod fetcher;
pub mod index;

pub use fetcher::{ensure_local, FetchOutcome};
pub use index::{Catalog, DatasetSource, IndexEntry};
