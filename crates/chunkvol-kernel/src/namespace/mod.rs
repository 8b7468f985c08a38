//! The virtual namespace.
//!
//! An arena of [`VirtualEntry`] values built once from a [`Manifest`]. Entry 0
//! is the root; parent links are arena indices and every directory owns a
//! [`DirectoryIndex`] of its children. After [`Namespace::build`] nothing
//! changes except that a file's extent map may be filled in once.
//!
//! Path traversal goes through [`Namespace::resolve`] only.

mod entry;
pub mod manifest;

pub use entry::{EntryAttributes, EntryKind, EntryRef, Timestamps, VirtualEntry};
pub use manifest::{Manifest, ManifestEntry, ManifestError, ManifestExtent};

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::MountConfig;
use crate::dir_index::{DirectoryIndex, IndexError, collation_key, validate_name};
use crate::extent::{ClusterLayout, ExtentError};
use crate::security::{DescriptorStore, SecurityError};

use entry::EntryContent;

/// Manifest validation failures. Each names the first offending entry.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("manifest has no entries")]
    EmptyManifest,

    #[error("entry {index} ({name:?}): root must be a directory")]
    RootNotDirectory { index: usize, name: String },

    #[error("entry {index} ({name:?}): root must not have a parent")]
    RootHasParent { index: usize, name: String },

    #[error("entry {index} ({name:?}): only entry 0 may omit its parent")]
    MultipleRoots { index: usize, name: String },

    #[error("entry {index} ({name:?}): parent {parent} is not an earlier entry")]
    ForwardParent {
        index: usize,
        name: String,
        parent: usize,
    },

    #[error("entry {index} ({name:?}): parent {parent} is not a directory")]
    ParentNotDirectory {
        index: usize,
        name: String,
        parent: usize,
    },

    #[error("entry {index} ({name:?}): invalid name")]
    InvalidName { index: usize, name: String },

    #[error("entry {index} ({name:?}): a sibling already has this name")]
    DuplicateName { index: usize, name: String },

    #[error("entry {index} ({name:?}): directories cannot have a size or extents")]
    KindMismatch { index: usize, name: String },

    #[error("entry {index} ({name:?}): {source}")]
    MalformedExtentMap {
        index: usize,
        name: String,
        #[source]
        source: ExtentError,
    },

    #[error("entry {index} ({name:?}): {source}")]
    Security {
        index: usize,
        name: String,
        #[source]
        source: SecurityError,
    },

    #[error("invalid mount config: {0}")]
    Config(String),
}

/// Path resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),
}

/// The mounted tree.
#[derive(Debug)]
pub struct Namespace {
    entries: Vec<VirtualEntry>,
    descriptors: DescriptorStore,
    layout: ClusterLayout,
}

/// Splits a manifest name into its leaf, checking any path prefix against the
/// parent's path.
fn leaf_name<'a>(name: &'a str, parent_path: &str) -> Option<&'a str> {
    match name.rsplit_once('/') {
        None => Some(name),
        Some((prefix, leaf)) => {
            (collation_key(prefix) == collation_key(parent_path)).then_some(leaf)
        }
    }
}

fn unix_time(seconds: Option<u64>, fallback: SystemTime) -> SystemTime {
    seconds.map_or(fallback, |s| UNIX_EPOCH + Duration::from_secs(s))
}

impl Namespace {
    /// Validate a manifest and build the namespace in one pass.
    pub fn build(manifest: &Manifest, config: &MountConfig) -> Result<Self, BuildError> {
        let layout = config
            .cluster_layout()
            .map_err(|e| BuildError::Config(e.to_string()))?;
        if manifest.entries.is_empty() {
            return Err(BuildError::EmptyManifest);
        }

        let mounted_at = SystemTime::now();
        let mut descriptors = DescriptorStore::new();
        let mut entries: Vec<VirtualEntry> = Vec::with_capacity(manifest.len());
        let mut paths: Vec<String> = Vec::with_capacity(manifest.len());
        let mut children: Vec<Vec<(String, EntryRef)>> = Vec::with_capacity(manifest.len());
        let mut sibling_keys: Vec<HashSet<Vec<u16>>> = Vec::with_capacity(manifest.len());

        for (index, row) in manifest.entries.iter().enumerate() {
            let name = || row.name.clone();

            let (parent, leaf) = if index == 0 {
                if row.parent.is_some() {
                    return Err(BuildError::RootHasParent { index, name: name() });
                }
                if !row.is_directory {
                    return Err(BuildError::RootNotDirectory { index, name: name() });
                }
                (None, row.name.as_str())
            } else {
                let parent = row
                    .parent
                    .ok_or_else(|| BuildError::MultipleRoots { index, name: name() })?;
                if parent >= index {
                    return Err(BuildError::ForwardParent {
                        index,
                        name: name(),
                        parent,
                    });
                }
                if !entries[parent].is_dir() {
                    return Err(BuildError::ParentNotDirectory {
                        index,
                        name: name(),
                        parent,
                    });
                }
                let leaf = leaf_name(&row.name, &paths[parent])
                    .filter(|leaf| validate_name(leaf).is_ok())
                    .ok_or_else(|| BuildError::InvalidName { index, name: name() })?;
                if !sibling_keys[parent].insert(collation_key(leaf)) {
                    return Err(BuildError::DuplicateName { index, name: name() });
                }
                (Some(parent), leaf)
            };

            let content = if row.is_directory {
                if row.size != 0 || row.extents.is_some() {
                    return Err(BuildError::KindMismatch { index, name: name() });
                }
                EntryContent::Directory {
                    index: DirectoryIndex::empty(),
                }
            } else {
                let map = row
                    .extent_map()
                    .map_err(|source| BuildError::MalformedExtentMap {
                        index,
                        name: name(),
                        source,
                    })?;
                EntryContent::File {
                    extents: OnceCell::new_with(map),
                }
            };

            let expression = row.security.as_deref().unwrap_or(&config.default_security);
            let (security_id, security) =
                descriptors
                    .intern(expression)
                    .map_err(|source| BuildError::Security {
                        index,
                        name: name(),
                        source,
                    })?;

            let entry_ref = EntryRef::new(index as u32);
            if let Some(parent) = parent {
                children[parent].push((leaf.to_string(), entry_ref));
            }
            paths.push(match parent {
                Some(parent) => format!("{}/{leaf}", paths[parent]),
                None => leaf.to_string(),
            });
            children.push(Vec::new());
            sibling_keys.push(HashSet::new());
            entries.push(VirtualEntry {
                name: leaf.to_string(),
                size: row.size,
                parent: parent.map(|p| EntryRef::new(p as u32)),
                content,
                security_id,
                security,
                modified: unix_time(row.modified, mounted_at),
            });
        }

        for (index, kids) in children.into_iter().enumerate() {
            if let EntryContent::Directory { index: dir_index } = &mut entries[index].content {
                *dir_index = DirectoryIndex::build(kids, config.index_fanout).map_err(|e| {
                    // sibling keys were checked above
                    let name = match e {
                        IndexError::DuplicateName(n)
                        | IndexError::InvalidName(n)
                        | IndexError::NotFound(n) => n,
                    };
                    BuildError::DuplicateName { index, name }
                })?;
            }
        }

        info!(
            entries = entries.len(),
            descriptors = descriptors.len(),
            "namespace built"
        );
        Ok(Self {
            entries,
            descriptors,
            layout,
        })
    }

    /// Walk `segments` from the root. An empty slice is the root itself.
    ///
    /// Every segment is checked against the naming rules before any lookup, so
    /// a malformed segment reports `InvalidName` wherever it appears.
    pub fn resolve<S: AsRef<str>>(&self, segments: &[S]) -> Result<EntryRef, NamespaceError> {
        for segment in segments {
            validate_name(segment.as_ref())
                .map_err(|_| NamespaceError::InvalidName(segment.as_ref().to_string()))?;
        }

        let mut current = self.root();
        let mut walked = String::new();
        for segment in segments {
            let segment = segment.as_ref();
            let index = self.entries[current.index()]
                .directory_index()
                .ok_or_else(|| NamespaceError::NotADirectory(display_path(&walked).to_string()))?;
            walked.push('\\');
            walked.push_str(segment);
            current = index.lookup(segment).map_err(|e| match e {
                IndexError::InvalidName(n) => NamespaceError::InvalidName(n),
                IndexError::NotFound(_) | IndexError::DuplicateName(_) => {
                    NamespaceError::NotFound(walked.clone())
                }
            })?;
        }

        debug!(path = %display_path(&walked), entry = current.id(), "resolved");
        Ok(current)
    }

    /// Split a `\`- or `/`-separated path and resolve it.
    pub fn resolve_path(&self, path: &str) -> Result<EntryRef, NamespaceError> {
        let segments: Vec<&str> = path
            .split(['\\', '/'])
            .filter(|s| !s.is_empty())
            .collect();
        self.resolve(&segments)
    }

    pub fn root(&self) -> EntryRef {
        EntryRef::new(0)
    }

    /// The entry behind a reference from this namespace.
    pub fn entry(&self, entry: EntryRef) -> Option<&VirtualEntry> {
        self.entries.get(entry.index())
    }

    /// Children of a directory in collation order; empty for files.
    pub fn children(&self, entry: EntryRef) -> impl Iterator<Item = (&str, EntryRef)> + '_ {
        self.entry(entry)
            .and_then(VirtualEntry::directory_index)
            .into_iter()
            .flat_map(DirectoryIndex::iter)
    }

    /// Full `\`-separated path of an entry below the root.
    pub fn path_of(&self, entry: EntryRef) -> Option<String> {
        let mut names = Vec::new();
        let mut current = self.entry(entry)?;
        while let Some(parent) = current.parent() {
            names.push(current.name());
            current = self.entry(parent)?;
        }
        names.reverse();
        Some(format!("\\{}", names.join("\\")))
    }

    /// Every entry in manifest order, root first.
    pub fn iter(&self) -> impl Iterator<Item = (EntryRef, &VirtualEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (EntryRef::new(i as u32), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptors(&self) -> &DescriptorStore {
        &self.descriptors
    }

    pub fn layout(&self) -> &ClusterLayout {
        &self.layout
    }

    /// Reported attributes. Pure; unresolved extent maps are not resolved.
    pub fn attributes(&self, entry: EntryRef) -> Option<EntryAttributes> {
        let e = self.entry(entry)?;
        let cluster = self.layout.cluster_size();
        let allocation_size = match e.kind() {
            EntryKind::File => e.size().div_ceil(cluster).saturating_mul(cluster),
            EntryKind::Directory => 0,
        };
        Some(EntryAttributes {
            kind: e.kind(),
            size: e.size(),
            allocation_size,
            index_number: u64::from(entry.id()),
            timestamps: Timestamps::uniform(e.modified()),
            security_id: e.security_id(),
            security: e.security().clone(),
        })
    }

    /// Mapping-pairs encoding of a file's extent map, once it is known.
    pub fn run_list(&self, entry: EntryRef) -> Option<Result<Vec<u8>, ExtentError>> {
        let map = self.entry(entry)?.extent_map()?;
        Some(map.encode_run_list(&self.layout))
    }
}

fn display_path(walked: &str) -> &str {
    if walked.is_empty() { "\\" } else { walked }
}
