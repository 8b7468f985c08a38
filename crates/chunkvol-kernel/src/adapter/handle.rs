//! Open handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::namespace::{EntryKind, EntryRef};

/// Handle returned by `open`. Never reused within a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHandle(pub u64);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Lifecycle of a handle. `Closed` handles leave the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlePhase {
    Opened,
    Reading,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenHandle {
    pub entry: EntryRef,
    pub kind: EntryKind,
    pub phase: HandlePhase,
    readers: u32,
}

/// Concurrent handle table.
#[derive(Debug)]
pub(crate) struct HandleTable {
    handles: DashMap<FileHandle, OpenHandle>,
    next: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, entry: EntryRef, kind: EntryKind) -> FileHandle {
        let handle = FileHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.handles.insert(
            handle,
            OpenHandle {
                entry,
                kind,
                phase: HandlePhase::Opened,
                readers: 0,
            },
        );
        handle
    }

    pub fn get(&self, handle: FileHandle) -> Option<OpenHandle> {
        self.handles.get(&handle).map(|h| *h)
    }

    /// Move a file handle into `Reading`. The guard is dropped before return.
    pub fn begin_read(&self, handle: FileHandle) -> Option<OpenHandle> {
        let mut open = self.handles.get_mut(&handle)?;
        if open.kind.is_file() {
            open.readers += 1;
            open.phase = HandlePhase::Reading;
        }
        Some(*open)
    }

    /// Undo one `begin_read`; the handle is `Opened` again once no read is
    /// in flight. A handle closed mid-read is left alone.
    pub fn end_read(&self, handle: FileHandle) {
        if let Some(mut open) = self.handles.get_mut(&handle)
            && open.readers > 0
        {
            open.readers -= 1;
            if open.readers == 0 {
                open.phase = HandlePhase::Opened;
            }
        }
    }

    pub fn remove(&self, handle: FileHandle) -> Option<OpenHandle> {
        self.handles.remove(&handle).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_removed() {
        let table = HandleTable::new();
        let a = table.insert(EntryRef::new(1), EntryKind::File);
        let b = table.insert(EntryRef::new(1), EntryKind::File);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);

        assert_eq!(table.begin_read(a).unwrap().phase, HandlePhase::Reading);
        assert_eq!(table.get(b).unwrap().phase, HandlePhase::Opened);

        table.end_read(a);
        assert_eq!(table.get(a).unwrap().phase, HandlePhase::Opened);

        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        assert!(table.get(a).is_none());
        assert!(table.begin_read(a).is_none());
    }

    #[test]
    fn test_directory_handles_never_read() {
        let table = HandleTable::new();
        let d = table.insert(EntryRef::new(0), EntryKind::Directory);
        assert_eq!(table.begin_read(d).unwrap().phase, HandlePhase::Opened);
        table.end_read(d);
        assert_eq!(table.get(d).unwrap().phase, HandlePhase::Opened);
    }

    #[test]
    fn test_overlapping_reads() {
        let table = HandleTable::new();
        let h = table.insert(EntryRef::new(2), EntryKind::File);
        table.begin_read(h);
        table.begin_read(h);
        table.end_read(h);
        assert_eq!(table.get(h).unwrap().phase, HandlePhase::Reading);
        table.end_read(h);
        assert_eq!(table.get(h).unwrap().phase, HandlePhase::Opened);
        table.end_read(h);
        assert_eq!(table.get(h).unwrap().phase, HandlePhase::Opened);
    }
}
