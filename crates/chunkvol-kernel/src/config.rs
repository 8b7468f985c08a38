//! Mount configuration.
//!
//! Loaded from RON; every field is optional:
//!
//! ```ron
//! (
//!     read_mode: Block(5000),
//!     enumerate_batch: 32,
//!     cluster_size: 4096,
//!     chunk_size: 1048576,
//! )
//! ```

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dir_index::DEFAULT_FANOUT;
use crate::extent::ClusterLayout;
use crate::security::{SecurityDescriptor, SecurityError};

/// Access policy applied to manifest entries without their own.
pub const DEFAULT_SECURITY: &str =
    "O:BAG:BAD:PAI(A;OICI;FA;;;SY)(A;OICI;FA;;;BA)(A;OICI;0x1200a9;;;WD)";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid default_security: {0}")]
    Security(#[from] SecurityError),
}

impl ConfigError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}

/// What a read does when the source has not delivered the bytes yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadMode {
    /// Return `NotYetAvailable` at once.
    #[default]
    FailFast,
    /// Wait for the source, up to this many milliseconds.
    Block(u64),
}

impl ReadMode {
    /// Blocking mode with the given timeout.
    pub fn block(timeout: Duration) -> Self {
        ReadMode::Block(timeout.as_millis().try_into().unwrap_or(u64::MAX))
    }

    /// The wait bound, `None` when failing fast.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            ReadMode::FailFast => None,
            ReadMode::Block(ms) => Some(Duration::from_millis(*ms)),
        }
    }
}

/// Settings for one mounted volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub read_mode: ReadMode,
    /// Most entries returned by one enumerate call.
    pub enumerate_batch: usize,
    /// Directory index fan-out.
    pub index_fanout: usize,
    pub cluster_size: u64,
    pub chunk_size: u64,
    pub default_security: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::FailFast,
            enumerate_batch: 64,
            index_fanout: DEFAULT_FANOUT,
            cluster_size: 4096,
            chunk_size: 1024 * 1024,
            default_security: DEFAULT_SECURITY.to_string(),
        }
    }
}

impl MountConfig {
    /// Parse and validate RON text.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: MountConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_ron_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enumerate_batch == 0 {
            return Err(ConfigError::invalid("enumerate_batch must be at least 1"));
        }
        if self.index_fanout < 2 {
            return Err(ConfigError::invalid("index_fanout must be at least 2"));
        }
        self.cluster_layout()?;
        SecurityDescriptor::from_expression(&self.default_security)?;
        Ok(())
    }

    pub fn cluster_layout(&self) -> Result<ClusterLayout, ConfigError> {
        ClusterLayout::new(self.cluster_size, self.chunk_size)
            .map_err(|e| ConfigError::invalid(e.to_string()))
    }

    pub fn with_read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }

    pub fn with_enumerate_batch(mut self, batch: usize) -> Self {
        self.enumerate_batch = batch;
        self
    }

    pub fn with_index_fanout(mut self, fanout: usize) -> Self {
        self.index_fanout = fanout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ron_is_default() {
        let config = MountConfig::from_ron_str("()").unwrap();
        assert_eq!(config, MountConfig::default());
        assert_eq!(config.read_mode, ReadMode::FailFast);
        assert_eq!(config.enumerate_batch, 64);
    }

    #[test]
    fn test_block_mode() {
        let config =
            MountConfig::from_ron_str("(read_mode: Block(250), enumerate_batch: 8)").unwrap();
        assert_eq!(config.read_mode.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.enumerate_batch, 8);
        assert_eq!(config.index_fanout, DEFAULT_FANOUT);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            MountConfig::from_ron_str("(enumerate_batch: 0)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(MountConfig::from_ron_str("(cluster_size: 4096, chunk_size: 5000)").is_err());
        assert!(matches!(
            MountConfig::from_ron_str(r#"(default_security: "O:QQ")"#),
            Err(ConfigError::Security(_))
        ));
        assert!(matches!(
            MountConfig::from_ron_str("(read_mode: Sometimes)"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mount.ron");
        std::fs::write(&path, "(index_fanout: 4)").unwrap();
        assert_eq!(MountConfig::load(&path).unwrap().index_fanout, 4);
        assert!(matches!(
            MountConfig::load(dir.path().join("nope.ron")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_read_mode_block_helper() {
        assert_eq!(ReadMode::block(Duration::from_secs(2)), ReadMode::Block(2000));
        assert_eq!(ReadMode::FailFast.timeout(), None);
    }
}
