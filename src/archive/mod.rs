//! Archive storage and validation
//!
//! Binary container access (memory-mapped arrays plus a JSON attribute
//! trailer), typed metadata, and the structural validator that runs once
//! before any sample is served.

pub mod container;
pub mod header;
pub mod metadata;
pub mod validate;

pub use container::{AttrMap, Container, ContainerRw, ContainerWriter, ROOT_NS};
pub use header::{ArchiveHeader, TocEntry, ARCHIVE_MAGIC, ARCHIVE_VERSION, HEADER_SIZE};
pub use metadata::ArchiveMetadata;
pub use validate::{sim_name, validate, ArchiveLayout, SIM_PREFIX};
