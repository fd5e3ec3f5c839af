//! Utility modules

pub mod error;

pub use error::{ArchiveError, CatalogError, CorruptionError, LoaderError, Result};
