//! Manifest: the table of entries a volume is built from.
//!
//! ```json
//! { "entries": [
//!     { "name": "root", "is_directory": true },
//!     { "name": "Binaries", "is_directory": true, "parent": 0 },
//!     { "name": "game.exe", "size": 8192, "parent": 1,
//!       "extents": [ { "offset": 0, "length": 8192, "chunk": 3 } ] }
//! ] }
//! ```
//!
//! Entry 0 is the root. Every other entry names an earlier directory as
//! its parent.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extent::{ChunkLocator, Extent, ExtentError, ExtentMap};

/// Manifest loading errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse manifest: {0}")]
    Json(#[from] serde_json::Error),
}

/// The manifest table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

/// One row of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Entry name, or a `/`-separated path whose last component is the name.
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_directory: bool,
    /// Index of the parent entry; absent only for the root.
    #[serde(default)]
    pub parent: Option<usize>,
    /// Known extents. Absent means resolved on first read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extents: Option<Vec<ManifestExtent>>,
    /// Access-control expression; the mount default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    /// Last-write time, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

/// One extent row. No `chunk` means sparse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestExtent {
    pub offset: u64,
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_offset: Option<u64>,
}

impl ManifestExtent {
    pub fn mapped(offset: u64, length: u64, chunk: u32, chunk_offset: u64) -> Self {
        Self {
            offset,
            length,
            chunk: Some(chunk),
            chunk_offset: Some(chunk_offset),
        }
    }

    pub fn sparse(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            chunk: None,
            chunk_offset: None,
        }
    }

    fn to_extent(self) -> Result<Extent, ExtentError> {
        match (self.chunk, self.chunk_offset) {
            (Some(chunk), offset) => Ok(Extent::mapped(
                self.offset,
                self.length,
                ChunkLocator::new(chunk, offset.unwrap_or(0)),
            )),
            (None, None) => Ok(Extent::sparse(self.offset, self.length)),
            (None, Some(_)) => Err(ExtentError::malformed(format!(
                "extent at offset {} has a chunk offset but no chunk",
                self.offset
            ))),
        }
    }
}

impl ManifestEntry {
    /// The root directory row.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            parent: None,
            ..Self::directory(name, 0)
        }
    }

    pub fn directory(name: impl Into<String>, parent: usize) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_directory: true,
            parent: Some(parent),
            extents: None,
            security: None,
            modified: None,
        }
    }

    pub fn file(name: impl Into<String>, size: u64, parent: usize) -> Self {
        Self {
            name: name.into(),
            size,
            is_directory: false,
            parent: Some(parent),
            extents: None,
            security: None,
            modified: None,
        }
    }

    pub fn with_extents(mut self, extents: Vec<ManifestExtent>) -> Self {
        self.extents = Some(extents);
        self
    }

    pub fn with_security(mut self, expression: impl Into<String>) -> Self {
        self.security = Some(expression.into());
        self
    }

    pub fn with_modified(mut self, unix_seconds: u64) -> Self {
        self.modified = Some(unix_seconds);
        self
    }

    /// The declared extents as a validated map, if any were given.
    pub fn extent_map(&self) -> Result<Option<ExtentMap>, ExtentError> {
        let Some(rows) = &self.extents else {
            return Ok(None);
        };
        let extents = rows
            .iter()
            .map(|row| row.to_extent())
            .collect::<Result<Vec<_>, _>>()?;
        ExtentMap::from_extents(self.size, extents).map(Some)
    }
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_string(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a manifest file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_rows() {
        let manifest = Manifest::from_json_str(
            r#"{ "entries": [
                { "name": "root", "is_directory": true },
                { "name": "a.bin", "size": 10, "parent": 0,
                  "extents": [ { "offset": 0, "length": 4, "chunk": 2, "chunk_offset": 8 },
                               { "offset": 4, "length": 6 } ] }
            ] }"#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries[0].parent, None);
        assert!(manifest.entries[0].is_directory);
        let map = manifest.entries[1].extent_map().unwrap().unwrap();
        assert_eq!(map.extents()[0], Extent::mapped(0, 4, ChunkLocator::new(2, 8)));
        assert!(map.extents()[1].target.is_sparse());
    }

    #[test]
    fn test_chunk_offset_without_chunk() {
        let entry = ManifestEntry::file("x", 4, 0).with_extents(vec![ManifestExtent {
            offset: 0,
            length: 4,
            chunk: None,
            chunk_offset: Some(1),
        }]);
        assert!(entry.extent_map().is_err());
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            Manifest::from_json_str("{ \"entries\": 3 }"),
            Err(ManifestError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = Manifest::new(vec![
            ManifestEntry::root("root"),
            ManifestEntry::file("f", 3, 0)
                .with_extents(vec![ManifestExtent::mapped(0, 3, 1, 0)])
                .with_modified(1_600_000_000),
        ]);
        tokio::fs::write(&path, manifest.to_json_string().unwrap())
            .await
            .unwrap();

        let loaded = Manifest::load(&path).await.unwrap();
        assert_eq!(loaded, manifest);
        assert!(matches!(
            Manifest::load(dir.path().join("missing.json")).await,
            Err(ManifestError::Io(_))
        ));
    }
}
