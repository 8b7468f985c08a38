//! # chunkvol-kernel
//!
//! A read-only volume synthesized over chunked game content that may still
//! be downloading.
//!
//! Nothing is extracted ahead of time. A mount builds, from a manifest:
//! - a namespace of files and directories (an arena with parent indices)
//! - per-file extent maps from logical ranges to chunk locations, with
//!   explicit sparse ranges for bytes without a known location
//! - per-directory B+ tree indexes under case-insensitive collation
//! - self-relative security descriptors, interned by content
//!
//! and a [`DriverAdapter`] answers the host driver's open, read, enumerate,
//! attribute and close callbacks, fetching bytes from a [`ChunkSource`].

pub mod adapter;
pub mod config;
pub mod dir_index;
pub mod extent;
pub mod namespace;
pub mod security;
pub mod source;

pub use adapter::{
    AdapterError, AdapterResult, ContinuationToken, DirEntryInfo, DriverAdapter, EnumerateBatch,
    FileHandle, HandlePhase, NtStatus,
};
pub use config::{ConfigError, MountConfig, ReadMode};
pub use dir_index::{DirectoryIndex, IndexError};
pub use extent::{
    ChunkLocator, Extent, ExtentError, ExtentMap, ExtentMapBuilder, ExtentTarget, Segment,
};
pub use namespace::{
    BuildError, EntryAttributes, EntryKind, EntryRef, Manifest, ManifestEntry, ManifestError,
    ManifestExtent, Namespace, NamespaceError, VirtualEntry,
};
pub use security::{DescriptorStore, SecurityDescriptor, SecurityError, SecurityId};
pub use source::{
    ChunkSource, FetchRequest, Fetched, LocalChunkSource, MemoryChunkSource, SourceError,
};
