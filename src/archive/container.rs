//! Memory-mapped archive container
//!
//! This module provides access to simulation archives: named f32 arrays
//! plus namespaced JSON attributes. Normal sample access goes through the
//! read-only [`Container`] (memory-mapped, zero-copy frame reads into
//! `ndarray` buffers). Attribute writes (normalization caches, merged
//! metadata) go through the separate [`ContainerRw`] handle, which only
//! ever rewrites the JSON trailer; array data is immutable once written.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use ndarray::{ArrayD, IxDyn};
use serde_json::Value;

use super::header::{
    ArchiveHeader, TocEntry, ARCHIVE_MAGIC, ARCHIVE_VERSION, HEADER_SIZE, MAX_NAME_LEN, MAX_RANK,
    TOC_ENTRY_SIZE,
};
use crate::utils::ArchiveError;

/// Namespace key for root-level attributes in the trailer
pub const ROOT_NS: &str = "/";

/// Namespaced attribute map: namespace ("/" or an array name) -> key -> value
pub type AttrMap = BTreeMap<String, serde_json::Map<String, Value>>;

/// Byte offset of `attr_len` within [`ArchiveHeader`]
/// (magic + version + array_count + padding + toc_offset + data_offset + attr_offset)
const ATTR_LEN_OFFSET: u64 = 40;

/// Parsed TOC entry with owned name and shape
#[derive(Debug, Clone)]
struct ArrayEntry {
    name: String,
    shape: Vec<usize>,
    data_offset: usize,
}

fn parse_header(bytes: &[u8]) -> Result<ArchiveHeader, ArchiveError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ArchiveError::FileTooSmall {
            size: bytes.len() as u64,
            minimum: HEADER_SIZE as u64,
        });
    }

    // SAFETY: we've verified the buffer is at least HEADER_SIZE bytes
    let header: ArchiveHeader = unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const _) };

    if header.magic != ARCHIVE_MAGIC {
        return Err(ArchiveError::InvalidMagic {
            expected: ARCHIVE_MAGIC,
            actual: header.magic,
        });
    }
    if header.version > ARCHIVE_VERSION {
        return Err(ArchiveError::UnsupportedVersion(header.version));
    }

    Ok(header)
}

fn parse_toc(bytes: &[u8], header: &ArchiveHeader) -> Result<Vec<ArrayEntry>, ArchiveError> {
    let count = header.array_count as usize;
    let toc_offset = header.toc_offset as usize;
    let toc_end = toc_offset + count * TOC_ENTRY_SIZE;
    if bytes.len() < toc_end {
        return Err(ArchiveError::FileTooSmall {
            size: bytes.len() as u64,
            minimum: toc_end as u64,
        });
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let offset = toc_offset + i * TOC_ENTRY_SIZE;
        // SAFETY: bounds checked above; packed struct read unaligned
        let entry: TocEntry =
            unsafe { std::ptr::read_unaligned(bytes[offset..].as_ptr() as *const _) };
        let rank = entry.rank as usize;
        if rank > MAX_RANK {
            return Err(ArchiveError::RankTooLarge {
                rank,
                max: MAX_RANK,
            });
        }
        entries.push(ArrayEntry {
            name: entry.name().to_string(),
            shape: entry.shape(),
            data_offset: entry.data_offset as usize,
        });
    }
    Ok(entries)
}

fn parse_attrs(bytes: &[u8], header: &ArchiveHeader) -> Result<AttrMap, ArchiveError> {
    let start = header.attr_offset as usize;
    let end = start + header.attr_len as usize;
    if header.attr_len == 0 {
        return Ok(AttrMap::new());
    }
    if bytes.len() < end {
        return Err(ArchiveError::FileTooSmall {
            size: bytes.len() as u64,
            minimum: end as u64,
        });
    }
    serde_json::from_slice(&bytes[start..end])
        .map_err(|e| ArchiveError::AttrDecode(e.to_string()))
}

fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Read-only memory-mapped archive
///
/// Frame reads copy out of the map into owned `ndarray` buffers; the map
/// itself is never written through this handle.
pub struct Container {
    mmap: Mmap,
    path: PathBuf,
    entries: Vec<ArrayEntry>,
    attrs: AttrMap,
}

impl Container {
    /// Open an archive file read-only and memory map it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let file = File::open(path.as_ref()).map_err(ArchiveError::OpenFailed)?;

        // SAFETY: the file is opened read-only and we never modify the memory
        let mmap = unsafe { Mmap::map(&file) }.map_err(ArchiveError::OpenFailed)?;

        let header = parse_header(&mmap)?;
        let entries = parse_toc(&mmap, &header)?;
        let attrs = parse_attrs(&mmap, &header)?;

        // Validate that every array's data lies within the file. TOC dims
        // are untrusted; the size computation itself must not overflow.
        for entry in &entries {
            let end = entry
                .shape
                .iter()
                .try_fold(std::mem::size_of::<f32>(), |acc, &d| acc.checked_mul(d))
                .and_then(|bytes| bytes.checked_add(entry.data_offset))
                .ok_or_else(|| ArchiveError::DimsOverflow(entry.name.clone()))?;
            if mmap.len() < end {
                return Err(ArchiveError::FileTooSmall {
                    size: mmap.len() as u64,
                    minimum: end as u64,
                });
            }
        }

        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
            entries,
            attrs,
        })
    }

    /// Path this container was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry(&self, name: &str) -> Result<&ArrayEntry, ArchiveError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ArchiveError::ArrayNotFound(name.to_string()))
    }

    /// List member array names with the given prefix, in TOC order
    pub fn list_members(&self, prefix: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.name.starts_with(prefix))
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Shape of a named array, if present
    pub fn array_shape(&self, name: &str) -> Option<&[usize]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.shape.as_slice())
    }

    /// Read an entire named array
    pub fn read_array(&self, name: &str) -> Result<ArrayD<f32>, ArchiveError> {
        let entry = self.entry(name)?;
        let bytes = entry.shape.iter().product::<usize>() * std::mem::size_of::<f32>();
        let data = decode_f32(&self.mmap[entry.data_offset..entry.data_offset + bytes]);
        Ok(ArrayD::from_shape_vec(IxDyn(&entry.shape), data)
            .expect("TOC shape matches decoded element count"))
    }

    /// Read a contiguous range of frames (leading-axis slices) of an array
    ///
    /// The result has shape `[end - start, dims[1..]]`.
    pub fn read_frames(
        &self,
        name: &str,
        start: usize,
        end: usize,
    ) -> Result<ArrayD<f32>, ArchiveError> {
        let entry = self.entry(name)?;
        let frames = *entry.shape.first().unwrap_or(&0);
        if start > end || end > frames {
            return Err(ArchiveError::FrameRangeOutOfBounds { start, end, frames });
        }

        let frame_elems: usize = entry.shape[1..].iter().product();
        let frame_bytes = frame_elems * std::mem::size_of::<f32>();
        let offset = entry.data_offset + start * frame_bytes;
        let data = decode_f32(&self.mmap[offset..offset + (end - start) * frame_bytes]);

        let mut shape = Vec::with_capacity(entry.shape.len());
        shape.push(end - start);
        shape.extend_from_slice(&entry.shape[1..]);
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)
            .expect("frame range shape matches decoded element count"))
    }

    /// Read a single frame of an array, with the leading axis dropped
    ///
    /// The result has shape `dims[1..]`.
    pub fn read_frame(&self, name: &str, frame: usize) -> Result<ArrayD<f32>, ArchiveError> {
        let arr = self.read_frames(name, frame, frame + 1)?;
        Ok(arr.index_axis_move(ndarray::Axis(0), 0))
    }

    /// Get an attribute in the given namespace ("/" for root)
    pub fn get_attr(&self, ns: &str, key: &str) -> Option<&Value> {
        self.attrs.get(ns).and_then(|m| m.get(key))
    }

    /// All attributes in a namespace
    pub fn attrs(&self, ns: &str) -> Option<&serde_json::Map<String, Value>> {
        self.attrs.get(ns)
    }
}

/// Read-write archive handle for attribute updates
///
/// Held transiently: opened, mutated, flushed, and dropped before a
/// read-only [`Container`] is reacquired. Only the JSON trailer (and the
/// header's `attr_len`) is rewritten.
pub struct ContainerRw {
    file: File,
    attr_offset: u64,
    attrs: AttrMap,
    dirty: bool,
}

impl ContainerRw {
    /// Open an archive file read-write
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(ArchiveError::OpenFailed)?;

        let mut header_bytes = vec![0u8; HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = parse_header(&header_bytes)?;

        file.seek(SeekFrom::Start(header.attr_offset))?;
        let mut attr_bytes = vec![0u8; header.attr_len as usize];
        file.read_exact(&mut attr_bytes)?;
        let attrs: AttrMap = if attr_bytes.is_empty() {
            AttrMap::new()
        } else {
            serde_json::from_slice(&attr_bytes)
                .map_err(|e| ArchiveError::AttrDecode(e.to_string()))?
        };

        Ok(Self {
            file,
            attr_offset: header.attr_offset,
            attrs,
            dirty: false,
        })
    }

    /// Set an attribute in the given namespace ("/" for root)
    pub fn set_attr(&mut self, ns: &str, key: &str, value: Value) {
        self.attrs
            .entry(ns.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.dirty = true;
    }

    /// Remove all attributes in a namespace whose key starts with `prefix`.
    /// Returns the number of removed entries.
    pub fn remove_attrs_with_prefix(&mut self, ns: &str, prefix: &str) -> usize {
        let Some(map) = self.attrs.get_mut(ns) else {
            return 0;
        };
        let before = map.len();
        map.retain(|k, _| !k.starts_with(prefix));
        let removed = before - map.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Get an attribute in the given namespace
    pub fn get_attr(&self, ns: &str, key: &str) -> Option<&Value> {
        self.attrs.get(ns).and_then(|m| m.get(key))
    }

    /// Rewrite the attribute trailer if anything changed
    pub fn flush(&mut self) -> Result<(), ArchiveError> {
        if !self.dirty {
            return Ok(());
        }

        let payload = serde_json::to_vec(&self.attrs)
            .map_err(|e| ArchiveError::AttrDecode(e.to_string()))?;

        self.file.seek(SeekFrom::Start(self.attr_offset))?;
        self.file.write_all(&payload)?;
        self.file
            .set_len(self.attr_offset + payload.len() as u64)?;

        self.file.seek(SeekFrom::Start(ATTR_LEN_OFFSET))?;
        self.file.write_all(&(payload.len() as u64).to_le_bytes())?;
        self.file.sync_all()?;

        self.dirty = false;
        Ok(())
    }
}

/// Builder that assembles a new archive file in memory and writes it out
///
/// Used by the fetcher (merging downloaded partitions) and by test setup.
/// Arrays are buffered until [`ContainerWriter::write`], which lays out
/// header, TOC, data, and trailer in one pass.
#[derive(Default)]
pub struct ContainerWriter {
    arrays: Vec<(String, ArrayD<f32>)>,
    attrs: AttrMap,
}

impl ContainerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named array. Names must be unique; later duplicates replace
    /// earlier ones so merges can overwrite.
    pub fn add_array(&mut self, name: &str, data: ArrayD<f32>) -> Result<(), ArchiveError> {
        if name.len() >= MAX_NAME_LEN {
            return Err(ArchiveError::NameTooLong(name.to_string()));
        }
        if data.ndim() > MAX_RANK {
            return Err(ArchiveError::RankTooLarge {
                rank: data.ndim(),
                max: MAX_RANK,
            });
        }
        if let Some(existing) = self.arrays.iter_mut().find(|(n, _)| n == name) {
            existing.1 = data;
        } else {
            self.arrays.push((name.to_string(), data));
        }
        Ok(())
    }

    /// True if an array with this name was already added
    pub fn has_array(&self, name: &str) -> bool {
        self.arrays.iter().any(|(n, _)| n == name)
    }

    /// Set an attribute in the given namespace ("/" for root)
    pub fn set_attr(&mut self, ns: &str, key: &str, value: Value) {
        self.attrs
            .entry(ns.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Write the complete archive to `path`, replacing any existing file
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ArchiveError> {
        let file = File::create(path.as_ref())?;
        let mut out = BufWriter::new(file);

        let toc_offset = HEADER_SIZE as u64;
        let data_offset = toc_offset + (self.arrays.len() * TOC_ENTRY_SIZE) as u64;

        // Compute per-array offsets
        let mut offsets = Vec::with_capacity(self.arrays.len());
        let mut cursor = data_offset;
        for (_, data) in &self.arrays {
            offsets.push(cursor);
            cursor += (data.len() * std::mem::size_of::<f32>()) as u64;
        }
        let attr_offset = cursor;

        let payload = serde_json::to_vec(&self.attrs)
            .map_err(|e| ArchiveError::AttrDecode(e.to_string()))?;

        let header = ArchiveHeader {
            magic: ARCHIVE_MAGIC,
            version: ARCHIVE_VERSION,
            array_count: self.arrays.len() as u32,
            _padding: [0; 4],
            toc_offset,
            data_offset,
            attr_offset,
            attr_len: payload.len() as u64,
            reserved: [0; 4048],
        };
        // SAFETY: ArchiveHeader is repr(C, packed) and exactly HEADER_SIZE bytes
        let header_bytes: [u8; HEADER_SIZE] = unsafe { std::mem::transmute(header) };
        out.write_all(&header_bytes)?;

        for ((name, data), &offset) in self.arrays.iter().zip(&offsets) {
            let mut name_bytes = [0u8; MAX_NAME_LEN];
            name_bytes[..name.len()].copy_from_slice(name.as_bytes());
            let mut dims = [0u64; MAX_RANK];
            for (i, &d) in data.shape().iter().enumerate() {
                dims[i] = d as u64;
            }
            let entry = TocEntry {
                name: name_bytes,
                rank: data.ndim() as u32,
                _padding: [0; 4],
                dims,
                data_offset: offset,
            };
            // SAFETY: TocEntry is repr(C, packed) and exactly TOC_ENTRY_SIZE bytes
            let entry_bytes: [u8; TOC_ENTRY_SIZE] = unsafe { std::mem::transmute(entry) };
            out.write_all(&entry_bytes)?;
        }

        for (_, data) in &self.arrays {
            // as_standard_layout gives contiguous C order regardless of how
            // the array was produced
            let standard = data.as_standard_layout();
            let mut bytes = Vec::with_capacity(standard.len() * std::mem::size_of::<f32>());
            for &v in standard.iter() {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            out.write_all(&bytes)?;
        }

        out.write_all(&payload)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sample_writer() -> ContainerWriter {
        let mut writer = ContainerWriter::new();
        let data = Array3::from_shape_fn((5, 2, 4), |(f, c, x)| (f * 100 + c * 10 + x) as f32);
        writer.add_array("sims/sim0", data.into_dyn()).unwrap();
        writer.set_attr(ROOT_NS, "Dt", serde_json::json!(0.01));
        writer.set_attr("sims/sim0", "Const1", serde_json::json!(0.5));
        writer
    }

    #[test]
    fn test_write_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pba");
        sample_writer().write(&path).unwrap();

        let container = Container::open(&path).unwrap();
        assert_eq!(container.list_members("sims/"), vec!["sims/sim0"]);
        assert_eq!(container.array_shape("sims/sim0").unwrap(), &[5, 2, 4]);

        let arr = container.read_array("sims/sim0").unwrap();
        assert_eq!(arr.shape(), &[5, 2, 4]);
        assert_eq!(arr[[3, 1, 2]], 312.0);

        assert_eq!(
            container.get_attr(ROOT_NS, "Dt").unwrap().as_f64().unwrap(),
            0.01
        );
        assert_eq!(
            container
                .get_attr("sims/sim0", "Const1")
                .unwrap()
                .as_f64()
                .unwrap(),
            0.5
        );
    }

    #[test]
    fn test_read_frames_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pba");
        sample_writer().write(&path).unwrap();

        let container = Container::open(&path).unwrap();
        let frames = container.read_frames("sims/sim0", 1, 4).unwrap();
        assert_eq!(frames.shape(), &[3, 2, 4]);
        assert_eq!(frames[[0, 0, 0]], 100.0);
        assert_eq!(frames[[2, 1, 3]], 313.0);

        let frame = container.read_frame("sims/sim0", 4).unwrap();
        assert_eq!(frame.shape(), &[2, 4]);
        assert_eq!(frame[[0, 1]], 401.0);
    }

    #[test]
    fn test_frame_range_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pba");
        sample_writer().write(&path).unwrap();

        let container = Container::open(&path).unwrap();
        let err = container.read_frames("sims/sim0", 3, 6).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::FrameRangeOutOfBounds { frames: 5, .. }
        ));
    }

    #[test]
    fn test_missing_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pba");
        sample_writer().write(&path).unwrap();

        let container = Container::open(&path).unwrap();
        assert!(matches!(
            container.read_array("sims/sim9"),
            Err(ArchiveError::ArrayNotFound(_))
        ));
    }

    #[test]
    fn test_overflowing_toc_dims_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overflow.pba");

        let toc_offset = HEADER_SIZE as u64;
        let data_offset = toc_offset + TOC_ENTRY_SIZE as u64;
        let payload = b"{}";
        let header = ArchiveHeader {
            magic: ARCHIVE_MAGIC,
            version: ARCHIVE_VERSION,
            array_count: 1,
            _padding: [0; 4],
            toc_offset,
            data_offset,
            attr_offset: data_offset,
            attr_len: payload.len() as u64,
            reserved: [0; 4048],
        };

        let mut name = [0u8; MAX_NAME_LEN];
        name[..9].copy_from_slice(b"sims/sim0");
        let mut dims = [0u64; MAX_RANK];
        dims[0] = u64::MAX / 2;
        dims[1] = 16;
        dims[2] = 16;
        let entry = TocEntry {
            name,
            rank: 3,
            _padding: [0; 4],
            dims,
            data_offset,
        };

        let mut bytes = Vec::new();
        let header_bytes: [u8; HEADER_SIZE] = unsafe { std::mem::transmute(header) };
        bytes.extend_from_slice(&header_bytes);
        let entry_bytes: [u8; TOC_ENTRY_SIZE] = unsafe { std::mem::transmute(entry) };
        bytes.extend_from_slice(&entry_bytes);
        bytes.extend_from_slice(payload);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            Container::open(&path),
            Err(ArchiveError::DimsOverflow(_))
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.pba");
        std::fs::write(&path, vec![0u8; HEADER_SIZE]).unwrap();

        assert!(matches!(
            Container::open(&path),
            Err(ArchiveError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_rw_attr_update_visible_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pba");
        sample_writer().write(&path).unwrap();

        {
            let mut rw = ContainerRw::open(&path).unwrap();
            rw.set_attr(ROOT_NS, "norm:std:all", serde_json::json!({"fields": [1.0, 2.0]}));
            rw.flush().unwrap();
        }

        let container = Container::open(&path).unwrap();
        assert!(container.get_attr(ROOT_NS, "norm:std:all").is_some());
        // Existing attrs survive the rewrite
        assert!(container.get_attr(ROOT_NS, "Dt").is_some());
        // Array data untouched
        let arr = container.read_array("sims/sim0").unwrap();
        assert_eq!(arr[[3, 1, 2]], 312.0);
    }

    #[test]
    fn test_rw_remove_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pba");
        sample_writer().write(&path).unwrap();

        let mut rw = ContainerRw::open(&path).unwrap();
        rw.set_attr(ROOT_NS, "norm:std:all", serde_json::json!(1));
        rw.set_attr(ROOT_NS, "norm:min-max:all", serde_json::json!(2));
        rw.flush().unwrap();
        assert_eq!(rw.remove_attrs_with_prefix(ROOT_NS, "norm:"), 2);
        rw.flush().unwrap();

        let container = Container::open(&path).unwrap();
        assert!(container.get_attr(ROOT_NS, "norm:std:all").is_none());
        assert!(container.get_attr(ROOT_NS, "Dt").is_some());
    }
}
