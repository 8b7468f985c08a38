//! Extent maps ("run lists").
//!
//! An [`ExtentMap`] covers a file's logical byte range `[0, size)` with an
//! ordered, gap-free sequence of [`Extent`]s. Ranges whose bytes live in a
//! chunk are [`ExtentTarget::Mapped`]; ranges with no known physical location
//! are [`ExtentTarget::Sparse`] and are asked of the chunk source by file range.
//!
//! Gaps are never represented by omission. A window lookup therefore always
//! yields either physical locations or explicit sparse segments.

mod run_list;

pub use run_list::{ClusterLayout, Run, decode_run_list};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Extent map errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtentError {
    /// The extents do not tile `[0, size)` exactly.
    #[error("malformed extent map: {0}")]
    MalformedExtentMap(String),

    /// The requested window reaches past the end of the file.
    #[error("window {offset}+{length} exceeds file size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    /// A mapped extent cannot be expressed in whole clusters.
    #[error("extent at {offset} is not aligned to {cluster_size}-byte clusters")]
    UnalignedExtent { offset: u64, cluster_size: u64 },
}

impl ExtentError {
    /// Create a MalformedExtentMap error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedExtentMap(reason.into())
    }
}

/// Physical location of a byte inside the chunk store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkLocator {
    /// Chunk index.
    pub chunk: u32,
    /// Byte offset within the chunk.
    pub offset: u64,
}

impl ChunkLocator {
    pub fn new(chunk: u32, offset: u64) -> Self {
        Self { chunk, offset }
    }

    /// The locator `delta` bytes further into the same chunk.
    pub fn advance(self, delta: u64) -> Self {
        Self {
            chunk: self.chunk,
            offset: self.offset + delta,
        }
    }
}

/// Where an extent's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtentTarget {
    /// Bytes live at a known chunk location.
    Mapped(ChunkLocator),
    /// No physical location is known yet.
    Sparse,
}

impl ExtentTarget {
    pub fn is_sparse(&self) -> bool {
        matches!(self, ExtentTarget::Sparse)
    }
}

/// One contiguous mapping unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// Logical offset in the file.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
    pub target: ExtentTarget,
}

impl Extent {
    pub fn mapped(offset: u64, length: u64, locator: ChunkLocator) -> Self {
        Self {
            offset,
            length,
            target: ExtentTarget::Mapped(locator),
        }
    }

    pub fn sparse(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            target: ExtentTarget::Sparse,
        }
    }

    /// One past the last logical byte. Callers guarantee no overflow.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A piece of a resolved window, split at extent boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Logical offset in the file where this segment starts.
    pub file_offset: u64,
    pub length: u64,
    /// Physical location of `file_offset`, or sparse.
    pub target: ExtentTarget,
}

impl Segment {
    pub fn is_sparse(&self) -> bool {
        self.target.is_sparse()
    }
}

/// Ordered, non-overlapping, gap-free extents covering exactly `[0, size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentMap {
    size: u64,
    extents: Vec<Extent>,
}

impl ExtentMap {
    /// The empty map of a zero-length file.
    pub fn empty() -> Self {
        Self {
            size: 0,
            extents: Vec::new(),
        }
    }

    /// A single sparse extent spanning the whole file.
    pub fn sparse(size: u64) -> Self {
        if size == 0 {
            return Self::empty();
        }
        Self {
            size,
            extents: vec![Extent::sparse(0, size)],
        }
    }

    /// Build a map from extents given in order.
    pub fn from_extents(
        size: u64,
        extents: impl IntoIterator<Item = Extent>,
    ) -> Result<Self, ExtentError> {
        let mut builder = ExtentMapBuilder::new(size);
        for extent in extents {
            builder.push(extent)?;
        }
        builder.finish()
    }

    /// Declared file size.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// True when no byte of the file is sparse.
    pub fn is_fully_mapped(&self) -> bool {
        self.extents.iter().all(|e| !e.target.is_sparse())
    }

    /// Translate `[offset, offset + length)` into segments.
    ///
    /// Mapped segments carry the locator of their first byte. A zero-length
    /// window inside the file yields no segments.
    pub fn resolve(&self, offset: u64, length: u64) -> Result<Vec<Segment>, ExtentError> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.size)
            .ok_or(ExtentError::OutOfRange {
                offset,
                length,
                size: self.size,
            })?;

        if length == 0 {
            return Ok(Vec::new());
        }

        let first = self.extents.partition_point(|e| e.end() <= offset);
        let mut segments = Vec::new();
        let mut cursor = offset;

        for extent in &self.extents[first..] {
            if cursor >= end {
                break;
            }
            let segment_end = extent.end().min(end);
            let target = match extent.target {
                ExtentTarget::Mapped(locator) => {
                    ExtentTarget::Mapped(locator.advance(cursor - extent.offset))
                }
                ExtentTarget::Sparse => ExtentTarget::Sparse,
            };
            segments.push(Segment {
                file_offset: cursor,
                length: segment_end - cursor,
                target,
            });
            cursor = segment_end;
        }

        Ok(segments)
    }
}

/// Incremental, validating constructor for [`ExtentMap`].
#[derive(Debug)]
pub struct ExtentMapBuilder {
    size: u64,
    cursor: u64,
    extents: Vec<Extent>,
}

impl ExtentMapBuilder {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            cursor: 0,
            extents: Vec::new(),
        }
    }

    /// Append the next extent. It must start exactly where the previous one ended.
    pub fn push(&mut self, extent: Extent) -> Result<(), ExtentError> {
        if extent.length == 0 {
            return Err(ExtentError::malformed(format!(
                "zero-length extent at offset {}",
                extent.offset
            )));
        }
        if extent.offset > self.cursor {
            return Err(ExtentError::malformed(format!(
                "gap [{}, {}) has no sparse extent",
                self.cursor, extent.offset
            )));
        }
        if extent.offset < self.cursor {
            return Err(ExtentError::malformed(format!(
                "extent at offset {} overlaps bytes before {}",
                extent.offset, self.cursor
            )));
        }
        let end = extent.offset.checked_add(extent.length).ok_or_else(|| {
            ExtentError::malformed(format!("extent at offset {} overflows", extent.offset))
        })?;
        if end > self.size {
            return Err(ExtentError::malformed(format!(
                "extent [{}, {}) runs past file size {}",
                extent.offset, end, self.size
            )));
        }
        if let ExtentTarget::Mapped(locator) = extent.target {
            if locator.offset.checked_add(extent.length).is_none() {
                return Err(ExtentError::malformed(format!(
                    "chunk {} offset {} overflows",
                    locator.chunk, locator.offset
                )));
            }
        }

        self.cursor = end;
        self.extents.push(extent);
        Ok(())
    }

    /// Finish, checking that coverage equals the declared size.
    pub fn finish(self) -> Result<ExtentMap, ExtentError> {
        if self.cursor != self.size {
            return Err(ExtentError::malformed(format!(
                "extents cover {} of {} bytes",
                self.cursor, self.size
            )));
        }
        Ok(ExtentMap {
            size: self.size,
            extents: self.extents,
        })
    }
}
