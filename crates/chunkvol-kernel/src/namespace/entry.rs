//! Namespace entries and their attributes.

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::dir_index::DirectoryIndex;
use crate::extent::ExtentMap;
use crate::security::{SecurityDescriptor, SecurityId};

/// Stable reference to an entry in a [`Namespace`](super::Namespace).
///
/// Only the namespace hands these out; the raw id doubles as the file index
/// number reported to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryRef(u32);

impl EntryRef {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

/// File or directory. Fixed for an entry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Kind-specific payload.
#[derive(Debug)]
pub(crate) enum EntryContent {
    /// Extent map, set at build time or on first read.
    File { extents: OnceCell<ExtentMap> },
    Directory { index: DirectoryIndex },
}

/// One node of the namespace.
#[derive(Debug)]
pub struct VirtualEntry {
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) parent: Option<EntryRef>,
    pub(crate) content: EntryContent,
    pub(crate) security_id: SecurityId,
    pub(crate) security: Arc<SecurityDescriptor>,
    pub(crate) modified: SystemTime,
}

impl VirtualEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        match self.content {
            EntryContent::File { .. } => EntryKind::File,
            EntryContent::Directory { .. } => EntryKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// Declared byte length; 0 for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn parent(&self) -> Option<EntryRef> {
        self.parent
    }

    /// The extent map when it is known, `None` for directories and for files
    /// not yet resolved.
    pub fn extent_map(&self) -> Option<&ExtentMap> {
        match &self.content {
            EntryContent::File { extents } => extents.get(),
            EntryContent::Directory { .. } => None,
        }
    }

    pub(crate) fn extents_cell(&self) -> Option<&OnceCell<ExtentMap>> {
        match &self.content {
            EntryContent::File { extents } => Some(extents),
            EntryContent::Directory { .. } => None,
        }
    }

    /// The child index of a directory.
    pub fn directory_index(&self) -> Option<&DirectoryIndex> {
        match &self.content {
            EntryContent::Directory { index } => Some(index),
            EntryContent::File { .. } => None,
        }
    }

    pub fn security(&self) -> &Arc<SecurityDescriptor> {
        &self.security
    }

    pub fn security_id(&self) -> SecurityId {
        self.security_id
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }
}

/// Entry timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub creation: SystemTime,
    pub last_access: SystemTime,
    pub last_write: SystemTime,
    pub change: SystemTime,
}

impl Timestamps {
    /// All four times set to `at`.
    pub fn uniform(at: SystemTime) -> Self {
        Self {
            creation: at,
            last_access: at,
            last_write: at,
            change: at,
        }
    }
}

/// Attributes reported for an entry.
#[derive(Debug, Clone)]
pub struct EntryAttributes {
    pub kind: EntryKind,
    /// Logical size in bytes.
    pub size: u64,
    /// Size rounded up to whole clusters.
    pub allocation_size: u64,
    /// File index number (the entry id).
    pub index_number: u64,
    pub timestamps: Timestamps,
    pub security_id: SecurityId,
    pub security: Arc<SecurityDescriptor>,
}

impl EntryAttributes {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}
