//! Chunk sources: where file bytes come from.
//!
//! The volume never stores content. Reads are translated into
//! [`FetchRequest`]s against a [`ChunkSource`], which either hands back the
//! bytes, reports that they have not arrived yet, or fails.

mod local;
mod memory;

pub use local::LocalChunkSource;
pub use memory::MemoryChunkSource;

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::extent::{ChunkLocator, ExtentMap};
use crate::namespace::EntryRef;

/// Source failures. All are transient from the volume's point of view.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt chunk data: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SourceError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt(reason.into())
    }
}

/// One piece of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub entry: EntryRef,
    /// Offset of the first byte within the file.
    pub file_offset: u64,
    pub length: u64,
    /// Where the bytes live, `None` for sparse ranges which are asked by
    /// file range.
    pub locator: Option<ChunkLocator>,
}

/// Outcome of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Exactly the requested bytes.
    Ready(Vec<u8>),
    /// Not downloaded yet.
    Pending,
}

/// Supplies bytes for reads.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetch one segment. A `Ready` result carries exactly `request.length` bytes.
    async fn fetch(&self, request: &FetchRequest) -> Result<Fetched, SourceError>;

    /// Generation counter, bumped whenever new data may have arrived.
    fn changes(&self) -> watch::Receiver<u64>;

    /// Extent map for a file the manifest left unresolved.
    async fn resolve_extents(&self, _entry: EntryRef, _size: u64) -> Option<ExtentMap> {
        None
    }
}
