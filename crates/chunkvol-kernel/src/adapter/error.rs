//! Adapter errors and the driver status codes they map to.

use std::fmt;
use std::io;

use thiserror::Error;

use super::FileHandle;
use crate::namespace::NamespaceError;

/// Driver status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    pub const INVALID_HANDLE: NtStatus = NtStatus(0xC000_0008);
    pub const END_OF_FILE: NtStatus = NtStatus(0xC000_0011);
    pub const OBJECT_NAME_INVALID: NtStatus = NtStatus(0xC000_0033);
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034);
    pub const OBJECT_PATH_NOT_FOUND: NtStatus = NtStatus(0xC000_003A);
    pub const DEVICE_DATA_ERROR: NtStatus = NtStatus(0xC000_009C);
    pub const DEVICE_NOT_READY: NtStatus = NtStatus(0xC000_00A3);
    pub const FILE_IS_A_DIRECTORY: NtStatus = NtStatus(0xC000_00BA);
    pub const NOT_A_DIRECTORY: NtStatus = NtStatus(0xC000_0103);
    pub const CANCELLED: NtStatus = NtStatus(0xC000_0120);

    /// Severity bits say error.
    pub fn is_error(&self) -> bool {
        self.0 >> 30 == 0b11
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Per-call adapter failures. None of them affect other handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Well-formed path with no entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path component before the last is a file.
    #[error("path component is not a directory: {0}")]
    PathNotADirectory(String),

    /// A path component breaks the naming rules.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Unknown or closed handle, or a call the handle's kind does not allow.
    #[error("invalid handle state for {handle}: {reason}")]
    InvalidHandleState { handle: FileHandle, reason: String },

    /// Byte read on a directory handle.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Enumeration on a file handle.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Read starting at or past end of file.
    #[error("offset {offset} is at or past end of file ({size} bytes)")]
    OutOfRange { offset: u64, size: u64 },

    /// Bytes not downloaded yet; retry later.
    #[error("data at {offset}+{length} is not yet available")]
    NotYetAvailable { offset: u64, length: u64 },

    /// The chunk source failed; the handle stays usable.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The host cancelled a blocked read.
    #[error("cancelled")]
    Cancelled,
}

impl AdapterError {
    pub(crate) fn invalid_handle(handle: FileHandle, reason: impl Into<String>) -> Self {
        Self::InvalidHandleState {
            handle,
            reason: reason.into(),
        }
    }

    /// The status reported to the driver framework.
    pub fn status(&self) -> NtStatus {
        match self {
            AdapterError::NotFound(_) => NtStatus::OBJECT_NAME_NOT_FOUND,
            AdapterError::PathNotADirectory(_) => NtStatus::OBJECT_PATH_NOT_FOUND,
            AdapterError::InvalidName(_) => NtStatus::OBJECT_NAME_INVALID,
            AdapterError::InvalidHandleState { .. } => NtStatus::INVALID_HANDLE,
            AdapterError::IsADirectory(_) => NtStatus::FILE_IS_A_DIRECTORY,
            AdapterError::NotADirectory(_) => NtStatus::NOT_A_DIRECTORY,
            AdapterError::OutOfRange { .. } => NtStatus::END_OF_FILE,
            AdapterError::NotYetAvailable { .. } => NtStatus::DEVICE_NOT_READY,
            AdapterError::SourceUnavailable(_) => NtStatus::DEVICE_DATA_ERROR,
            AdapterError::Cancelled => NtStatus::CANCELLED,
        }
    }

    /// True for conditions a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::NotYetAvailable { .. }
                | AdapterError::SourceUnavailable(_)
                | AdapterError::Cancelled
        )
    }
}

impl From<NamespaceError> for AdapterError {
    fn from(e: NamespaceError) -> Self {
        match e {
            NamespaceError::NotFound(path) => AdapterError::NotFound(path),
            NamespaceError::InvalidName(name) => AdapterError::InvalidName(name),
            NamespaceError::NotADirectory(path) => AdapterError::PathNotADirectory(path),
        }
    }
}

impl From<&AdapterError> for NtStatus {
    fn from(e: &AdapterError) -> Self {
        e.status()
    }
}

/// Convert AdapterError to std::io::Error for compatibility.
impl From<AdapterError> for io::Error {
    fn from(e: AdapterError) -> Self {
        let kind = match &e {
            AdapterError::NotFound(_) => io::ErrorKind::NotFound,
            AdapterError::PathNotADirectory(_) | AdapterError::NotADirectory(_) => {
                io::ErrorKind::NotADirectory
            }
            AdapterError::InvalidName(_) | AdapterError::InvalidHandleState { .. } => {
                io::ErrorKind::InvalidInput
            }
            AdapterError::IsADirectory(_) => io::ErrorKind::IsADirectory,
            AdapterError::OutOfRange { .. } => io::ErrorKind::UnexpectedEof,
            AdapterError::NotYetAvailable { .. } => io::ErrorKind::WouldBlock,
            AdapterError::SourceUnavailable(_) => io::ErrorKind::Other,
            AdapterError::Cancelled => io::ErrorKind::Interrupted,
        };
        io::Error::new(kind, e)
    }
}

/// Adapter result type.
pub type AdapterResult<T> = Result<T, AdapterError>;
