//! Archive container header structure
//!
//! This module defines the binary header format for simulation archives.
//! An archive holds named f32 arrays (one per simulation) plus a JSON
//! attribute trailer for metadata, per-simulation constants, and cached
//! normalization statistics.

/// Archive magic number to identify valid files
pub const ARCHIVE_MAGIC: u32 = 0x50444231; // "PDB1"

/// Current format version
pub const ARCHIVE_VERSION: u32 = 1;

/// Header size in bytes (always 4096 for alignment)
pub const HEADER_SIZE: usize = 4096;

/// Fixed size of one table-of-contents entry
pub const TOC_ENTRY_SIZE: usize = 176;

/// Maximum array name length (null-padded in the TOC)
pub const MAX_NAME_LEN: usize = 96;

/// Maximum array rank representable in a TOC entry
pub const MAX_RANK: usize = 8;

/// Binary archive header
///
/// Read directly from the first [`HEADER_SIZE`] bytes of the file. The
/// packed representation keeps the on-disk layout byte-exact.
///
/// File layout:
///   - header (4096 bytes)
///   - TOC: `array_count` entries of [`TOC_ENTRY_SIZE`] bytes each
///   - array data: contiguous little-endian f32, C order
///   - attribute trailer: `attr_len` bytes of JSON at `attr_offset`
///
/// The trailer is the only section that is ever rewritten after creation;
/// arrays are immutable once written.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ArchiveHeader {
    /// Magic number (0x50444231)
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Number of arrays in the TOC
    pub array_count: u32,
    /// Padding for alignment
    pub _padding: [u8; 4],
    /// File offset of the TOC (always HEADER_SIZE)
    pub toc_offset: u64,
    /// File offset of the first array's data
    pub data_offset: u64,
    /// File offset of the attribute trailer
    pub attr_offset: u64,
    /// Byte length of the attribute trailer
    pub attr_len: u64,
    /// Reserved for future use (pads header to 4096 bytes)
    pub reserved: [u8; 4048],
}

// Ensure the header is exactly 4096 bytes
const _: () = assert!(std::mem::size_of::<ArchiveHeader>() == HEADER_SIZE);

/// One table-of-contents entry describing a named array
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct TocEntry {
    /// Array name (null-terminated, max 95 chars)
    pub name: [u8; MAX_NAME_LEN],
    /// Number of dimensions actually used in `dims`
    pub rank: u32,
    /// Padding for alignment
    pub _padding: [u8; 4],
    /// Dimension sizes (unused trailing entries are zero)
    pub dims: [u64; MAX_RANK],
    /// Absolute file offset of the array data
    pub data_offset: u64,
}

const _: () = assert!(std::mem::size_of::<TocEntry>() == TOC_ENTRY_SIZE);

impl TocEntry {
    /// Get array name as string
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("unknown")
    }

    /// Get dimension sizes as a vec
    pub fn shape(&self) -> Vec<usize> {
        let rank = (self.rank as usize).min(MAX_RANK);
        let dims = self.dims;
        dims[..rank].iter().map(|&d| d as usize).collect()
    }

    /// Total number of elements
    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    /// Total byte length of the array data
    pub fn byte_len(&self) -> usize {
        self.num_elements() * std::mem::size_of::<f32>()
    }
}
