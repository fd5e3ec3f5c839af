//! Error types for pde-sample-loader

use std::io;
use thiserror::Error;

/// Top-level loader error
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Corrupt archive: {0}")]
    Corrupt(#[from] CorruptionError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Sample index {index} out of range (dataset length {length})")]
    OutOfRange { index: usize, length: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Archive read handle was not reacquired after write access; reopen the dataset")]
    HandleLost,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Container-level errors: the file itself cannot be opened or decoded
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Invalid archive magic: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidMagic { expected: u32, actual: u32 },

    #[error("Unsupported archive version: {0}")]
    UnsupportedVersion(u32),

    #[error("Archive file too small: {size} bytes, minimum {minimum} bytes")]
    FileTooSmall { size: u64, minimum: u64 },

    #[error("Array '{0}' dimensions overflow the addressable range")]
    DimsOverflow(String),

    #[error("Array '{0}' not found in archive")]
    ArrayNotFound(String),

    #[error("Array rank {rank} exceeds maximum {max}")]
    RankTooLarge { rank: usize, max: usize },

    #[error("Array name '{0}' exceeds maximum length")]
    NameTooLong(String),

    #[error("Frame range {start}..{end} out of bounds for array with {frames} frames")]
    FrameRangeOutOfBounds {
        start: usize,
        end: usize,
        frames: usize,
    },

    #[error("Invalid attribute payload: {0}")]
    AttrDecode(String),

    #[error("Invalid metadata: {0}")]
    MetadataDecode(String),

    #[error("Failed to open archive: {0}")]
    OpenFailed(io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Structural inconsistency across simulations or metadata.
///
/// Fatal: serving samples from an inconsistent archive would silently
/// corrupt training data, so construction aborts and nothing is retried.
#[derive(Error, Debug)]
pub enum CorruptionError {
    #[error("Simulation data must have shape (frames, fields, spatial dims...), got rank {0}")]
    RankTooLow(usize),

    #[error("Inconsistent number of fields between metadata ({meta}) and simulations ({actual})")]
    FieldCountMismatch { meta: usize, actual: usize },

    #[error("Shape of simulation '{sim}' ({actual:?}) does not match first simulation ({expected:?})")]
    ShapeMismatch {
        sim: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Simulation '{sim}' does not define all declared constants: {missing:?}")]
    MissingConstants { sim: String, missing: Vec<String> },

    #[error("Simulation member '{0}' does not follow the sims/sim<N> naming scheme")]
    MalformedSimName(String),

    #[error("Archive contains no simulations")]
    Empty,
}

/// Catalog and download errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Dataset '{name}' not found, datasets available are: {}", known.join(", "))]
    NotFound { name: String, known: Vec<String> },

    #[error("Failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("A partition file must contain exactly one simulation, '{0}' has {1}")]
    InvalidPartition(String, usize),

    #[error("Invalid index payload: {0}")]
    IndexDecode(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
