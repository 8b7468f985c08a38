//! The driver callback surface.
//!
//! [`DriverAdapter`] answers open, read, enumerate, attribute and close
//! callbacks against a mounted [`Namespace`]. The namespace is shared
//! read-only; the only mutable state is the handle table and the one-time
//! extent map cells.
//!
//! Reads that hit bytes the source does not have yet follow
//! [`ReadMode`](crate::config::ReadMode): fail at once with
//! `NotYetAvailable`, or wait on the source's change notifications until the
//! data lands, the timeout passes, or the host cancels.

mod error;
mod handle;
pub mod wire;

pub use error::{AdapterError, AdapterResult, NtStatus};
pub use handle::{FileHandle, HandlePhase};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::MountConfig;
use crate::extent::{ExtentMap, ExtentTarget, Segment};
use crate::namespace::{
    BuildError, EntryAttributes, EntryRef, Manifest, Namespace, VirtualEntry,
};
use crate::security::SecurityDescriptor;
use crate::source::{ChunkSource, FetchRequest, Fetched};

use handle::{HandleTable, OpenHandle};

/// Resume point for directory enumeration: the last name returned.
///
/// Replaying a token always yields the same batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken {
    after: String,
}

impl ContinuationToken {
    /// Resume after `name`, as the host does when it passes a marker.
    pub fn after(name: impl Into<String>) -> Self {
        Self { after: name.into() }
    }

    pub fn last_name(&self) -> &str {
        &self.after
    }
}

/// One enumerated child.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub entry: EntryRef,
    pub attributes: EntryAttributes,
}

/// A page of directory entries.
#[derive(Debug, Clone)]
pub struct EnumerateBatch {
    pub entries: Vec<DirEntryInfo>,
    /// Present when more entries remain.
    pub next: Option<ContinuationToken>,
}

impl EnumerateBatch {
    /// The page as driver directory records.
    pub fn dir_infos(&self) -> Vec<wire::DirInfo> {
        self.entries
            .iter()
            .map(|e| wire::DirInfo::new(e.name.clone(), &e.attributes))
            .collect()
    }
}

/// Returns a handle to `Opened` when its read ends, however it ends.
struct ReadGuard<'a> {
    handles: &'a HandleTable,
    handle: FileHandle,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.handles.end_read(self.handle);
    }
}

/// Callback surface for one mounted volume.
pub struct DriverAdapter {
    namespace: Arc<Namespace>,
    source: Arc<dyn ChunkSource>,
    config: MountConfig,
    handles: HandleTable,
}

impl std::fmt::Debug for DriverAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverAdapter")
            .field("entries", &self.namespace.len())
            .field("open_handles", &self.handles.len())
            .field("read_mode", &self.config.read_mode)
            .finish()
    }
}

impl DriverAdapter {
    /// Build the namespace from a manifest and mount it.
    ///
    /// Any validation failure aborts the mount; no partial volume exists.
    pub fn mount(
        manifest: &Manifest,
        config: MountConfig,
        source: Arc<dyn ChunkSource>,
    ) -> Result<Self, BuildError> {
        config
            .validate()
            .map_err(|e| BuildError::Config(e.to_string()))?;
        let namespace = Namespace::build(manifest, &config)?;
        Self::new(Arc::new(namespace), config, source)
    }

    /// Serve an already built namespace.
    pub fn new(
        namespace: Arc<Namespace>,
        config: MountConfig,
        source: Arc<dyn ChunkSource>,
    ) -> Result<Self, BuildError> {
        config
            .validate()
            .map_err(|e| BuildError::Config(e.to_string()))?;
        Ok(Self {
            namespace,
            source,
            config,
            handles: HandleTable::new(),
        })
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Number of handles not yet closed.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Open the entry at `segments` below the root.
    pub fn open<S: AsRef<str>>(&self, segments: &[S]) -> AdapterResult<FileHandle> {
        let entry = self.namespace.resolve(segments).inspect_err(|e| {
            debug!(error = %e, "open failed");
        })?;
        self.open_entry(entry)
    }

    /// Open a `\`-separated path.
    pub fn open_path(&self, path: &str) -> AdapterResult<FileHandle> {
        let entry = self.namespace.resolve_path(path).inspect_err(|e| {
            debug!(path, error = %e, "open failed");
        })?;
        self.open_entry(entry)
    }

    fn open_entry(&self, entry: EntryRef) -> AdapterResult<FileHandle> {
        let kind = self
            .namespace
            .entry(entry)
            .ok_or_else(|| AdapterError::NotFound(format!("#{}", entry.id())))?
            .kind();
        let handle = self.handles.insert(entry, kind);
        debug!(%handle, entry = entry.id(), ?kind, "opened");
        Ok(handle)
    }

    fn lookup(&self, handle: FileHandle, operation: &str) -> AdapterResult<OpenHandle> {
        self.handles.get(handle).ok_or_else(|| {
            warn!(%handle, operation, "rejected: handle is not open");
            AdapterError::invalid_handle(
                handle,
                format!("{operation} on a handle that is not open"),
            )
        })
    }

    fn entry(&self, handle: FileHandle, open: &OpenHandle) -> AdapterResult<&VirtualEntry> {
        self.namespace
            .entry(open.entry)
            .ok_or_else(|| AdapterError::invalid_handle(handle, "entry is not in this namespace"))
    }

    fn display_path(&self, entry: EntryRef) -> String {
        self.namespace
            .path_of(entry)
            .unwrap_or_else(|| format!("#{}", entry.id()))
    }

    /// Read up to `length` bytes at `offset`; never cancelled.
    pub async fn read(
        &self,
        handle: FileHandle,
        offset: u64,
        length: u32,
    ) -> AdapterResult<Vec<u8>> {
        self.read_cancellable(handle, offset, length, &CancellationToken::new())
            .await
    }

    /// Read up to `length` bytes at `offset`.
    ///
    /// Reads stop at end of file. A read starting at or past the end with a
    /// non-zero length fails with `OutOfRange`. Under `ReadMode::Block` the
    /// timeout bounds the whole read, not each segment.
    #[instrument(level = "debug", skip(self, cancel))]
    pub async fn read_cancellable(
        &self,
        handle: FileHandle,
        offset: u64,
        length: u32,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<u8>> {
        let open = self.handles.begin_read(handle).ok_or_else(|| {
            warn!(%handle, "rejected read: handle is not open");
            AdapterError::invalid_handle(handle, "read on a handle that is not open")
        })?;
        let deadline = self.config.read_mode.timeout().map(|t| Instant::now() + t);
        let _reading = ReadGuard {
            handles: &self.handles,
            handle,
        };
        let entry = self.entry(handle, &open)?;
        if !open.kind.is_file() {
            return Err(AdapterError::IsADirectory(self.display_path(open.entry)));
        }

        let size = entry.size();
        if length == 0 {
            return Ok(Vec::new());
        }
        if offset >= size {
            return Err(AdapterError::OutOfRange { offset, size });
        }
        let length = u64::from(length).min(size - offset);

        let map = self.extent_map(open.entry, entry).await?;
        let segments = map
            .resolve(offset, length)
            .map_err(|_| AdapterError::OutOfRange { offset, size })?;

        let mut out = Vec::with_capacity(length as usize);
        for segment in &segments {
            let bytes = self
                .fetch_segment(open.entry, segment, deadline, cancel)
                .await?;
            out.extend_from_slice(&bytes);
        }
        debug!(offset, length, segments = segments.len(), "read complete");
        Ok(out)
    }

    /// The file's extent map, resolving it through the source on first use.
    async fn extent_map<'a>(
        &self,
        entry_ref: EntryRef,
        entry: &'a VirtualEntry,
    ) -> AdapterResult<&'a ExtentMap> {
        let cell = entry
            .extents_cell()
            .ok_or_else(|| AdapterError::IsADirectory(self.display_path(entry_ref)))?;
        let size = entry.size();
        let map = cell
            .get_or_init(|| async {
                match self.source.resolve_extents(entry_ref, size).await {
                    Some(map) if map.size() == size => map,
                    Some(map) => {
                        warn!(
                            entry = entry_ref.id(),
                            expected = size,
                            got = map.size(),
                            "source extent map has the wrong size, treating file as sparse"
                        );
                        ExtentMap::sparse(size)
                    }
                    None => ExtentMap::sparse(size),
                }
            })
            .await;
        Ok(map)
    }

    /// Fetch one segment, applying the read mode when it is pending.
    async fn fetch_segment(
        &self,
        entry: EntryRef,
        segment: &Segment,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<u8>> {
        let request = FetchRequest {
            entry,
            file_offset: segment.file_offset,
            length: segment.length,
            locator: match segment.target {
                ExtentTarget::Mapped(locator) => Some(locator),
                ExtentTarget::Sparse => None,
            },
        };
        let not_yet = || AdapterError::NotYetAvailable {
            offset: segment.file_offset,
            length: segment.length,
        };
        // Subscribe before the first fetch so no notification is missed.
        let mut changes = self.source.changes();

        loop {
            if cancel.is_cancelled() {
                return Err(AdapterError::Cancelled);
            }
            match self.source.fetch(&request).await {
                Ok(Fetched::Ready(bytes)) if bytes.len() as u64 == segment.length => {
                    return Ok(bytes);
                }
                Ok(Fetched::Ready(bytes)) => {
                    warn!(
                        entry = entry.id(),
                        expected = segment.length,
                        got = bytes.len(),
                        "source returned a short segment"
                    );
                    return Err(AdapterError::SourceUnavailable(format!(
                        "short segment: {} of {} bytes",
                        bytes.len(),
                        segment.length
                    )));
                }
                Ok(Fetched::Pending) => {}
                Err(e) => {
                    warn!(entry = entry.id(), error = %e, "chunk source failed");
                    return Err(AdapterError::SourceUnavailable(e.to_string()));
                }
            }

            let Some(deadline) = deadline else {
                return Err(not_yet());
            };
            debug!(offset = segment.file_offset, "waiting for source data");
            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(not_yet()),
                changed = changes.changed() => {
                    // A dropped sender will never announce new data.
                    if changed.is_err() {
                        return Err(not_yet());
                    }
                }
            }
        }
    }

    /// Next page of a directory listing.
    ///
    /// `.` and `..` are not reported.
    pub fn enumerate(
        &self,
        handle: FileHandle,
        token: Option<&ContinuationToken>,
    ) -> AdapterResult<EnumerateBatch> {
        let open = self.lookup(handle, "enumerate")?;
        let entry = self.entry(handle, &open)?;
        let index = entry
            .directory_index()
            .ok_or_else(|| AdapterError::NotADirectory(self.display_path(open.entry)))?;

        let limit = self.config.enumerate_batch;
        let mut page: Vec<(&str, EntryRef)> = match token {
            Some(token) => index.seek_after(token.last_name()).take(limit + 1).collect(),
            None => index.iter().take(limit + 1).collect(),
        };
        let more = page.len() > limit;
        page.truncate(limit);

        let entries = page
            .into_iter()
            .filter_map(|(name, child)| {
                Some(DirEntryInfo {
                    name: name.to_string(),
                    entry: child,
                    attributes: self.namespace.attributes(child)?,
                })
            })
            .collect::<Vec<_>>();
        let next = if more {
            entries.last().map(|e| ContinuationToken::after(e.name.clone()))
        } else {
            None
        };

        debug!(%handle, returned = entries.len(), more, "enumerated");
        Ok(EnumerateBatch { entries, next })
    }

    pub fn get_attributes(&self, handle: FileHandle) -> AdapterResult<EntryAttributes> {
        let open = self.lookup(handle, "get_attributes")?;
        self.namespace
            .attributes(open.entry)
            .ok_or_else(|| AdapterError::invalid_handle(handle, "entry is not in this namespace"))
    }

    /// Attributes as the driver's 72-byte record.
    pub fn get_file_info(&self, handle: FileHandle) -> AdapterResult<wire::FileInfo> {
        Ok(wire::FileInfo::from_attributes(&self.get_attributes(handle)?))
    }

    pub fn get_security(&self, handle: FileHandle) -> AdapterResult<Arc<SecurityDescriptor>> {
        let open = self.lookup(handle, "get_security")?;
        Ok(self.entry(handle, &open)?.security().clone())
    }

    /// Current phase of an open handle.
    pub fn phase(&self, handle: FileHandle) -> AdapterResult<HandlePhase> {
        Ok(self.lookup(handle, "phase")?.phase)
    }

    /// Release a handle. Unknown handles are logged and ignored.
    pub fn close(&self, handle: FileHandle) {
        match self.handles.remove(handle) {
            Some(open) => debug!(%handle, entry = open.entry.id(), "closed"),
            None => warn!(%handle, "close of a handle that is not open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadMode;
    use crate::namespace::{ManifestEntry, ManifestExtent};
    use crate::source::MemoryChunkSource;

    fn mount(config: MountConfig) -> (DriverAdapter, Arc<MemoryChunkSource>) {
        let manifest = Manifest::new(vec![
            ManifestEntry::root("root"),
            ManifestEntry::directory("Content", 0),
            ManifestEntry::file("game.bin", 3000, 0).with_extents(vec![
                ManifestExtent::mapped(0, 1000, 0, 0),
                ManifestExtent::sparse(1000, 1000),
                ManifestExtent::mapped(2000, 1000, 1, 0),
            ]),
            ManifestEntry::file("empty.txt", 0, 1),
        ]);
        let source = Arc::new(MemoryChunkSource::new());
        let adapter = DriverAdapter::mount(&manifest, config, source.clone()).unwrap();
        (adapter, source)
    }

    #[tokio::test]
    async fn test_read_mapped_bytes() {
        let (adapter, source) = mount(MountConfig::default());
        source.insert_chunk(0, vec![0xAA; 1000]);
        let h = adapter.open(&["game.bin"]).unwrap();
        assert_eq!(adapter.phase(h).unwrap(), HandlePhase::Opened);

        let bytes = adapter.read(h, 10, 20).await.unwrap();
        assert_eq!(bytes, vec![0xAA; 20]);
        assert_eq!(adapter.phase(h).unwrap(), HandlePhase::Opened);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_while_blocked() {
        let config = MountConfig::default()
            .with_read_mode(ReadMode::block(std::time::Duration::from_secs(10)));
        let (adapter, source) = mount(config);
        let h = adapter.open(&["game.bin"]).unwrap();

        let (read, ()) = tokio::join!(adapter.read(h, 0, 10), async {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            assert_eq!(adapter.phase(h).unwrap(), HandlePhase::Reading);
            source.insert_chunk(0, vec![5; 1000]);
        });
        assert_eq!(read.unwrap(), vec![5; 10]);
        assert_eq!(adapter.phase(h).unwrap(), HandlePhase::Opened);
    }

    #[tokio::test]
    async fn test_phase_restored_after_failure() {
        let (adapter, source) = mount(MountConfig::default());
        let h = adapter.open(&["game.bin"]).unwrap();
        assert!(adapter.read(h, 1500, 10).await.is_err());
        assert_eq!(adapter.phase(h).unwrap(), HandlePhase::Opened);

        let entry = adapter.namespace().resolve(&["game.bin"]).unwrap();
        source.fail_entry(entry, "offline");
        assert!(adapter.read(h, 0, 10).await.is_err());
        assert_eq!(adapter.phase(h).unwrap(), HandlePhase::Opened);
    }

    #[test]
    fn test_new_validates_config() {
        let manifest = Manifest::new(vec![ManifestEntry::root("root")]);
        let config = MountConfig::default();
        let namespace = Arc::new(Namespace::build(&manifest, &config).unwrap());
        let source = Arc::new(MemoryChunkSource::new());

        let zero_batch = config.clone().with_enumerate_batch(0);
        assert!(matches!(
            DriverAdapter::new(namespace.clone(), zero_batch, source.clone()),
            Err(BuildError::Config(_))
        ));
        assert!(DriverAdapter::new(namespace, config, source).is_ok());
    }

    #[tokio::test]
    async fn test_read_clamps_at_eof() {
        let (adapter, source) = mount(MountConfig::default());
        source.insert_chunk(1, (0..1000).map(|i| i as u8).collect());
        let h = adapter.open(&["game.bin"]).unwrap();

        let bytes = adapter.read(h, 2990, 100).await.unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[0], (990 % 256) as u8);

        assert_eq!(
            adapter.read(h, 3000, 1).await,
            Err(AdapterError::OutOfRange { offset: 3000, size: 3000 })
        );
        assert_eq!(adapter.read(h, 3000, 0).await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_read_spanning_pending_segment_fails_fast() {
        let (adapter, source) = mount(MountConfig::default());
        source.insert_chunk(0, vec![1; 1000]);
        let h = adapter.open(&["game.bin"]).unwrap();
        let err = adapter.read(h, 900, 200).await.unwrap_err();
        assert_eq!(err, AdapterError::NotYetAvailable { offset: 1000, length: 100 });
        assert_eq!(err.status(), NtStatus::DEVICE_NOT_READY);
    }

    #[tokio::test]
    async fn test_kind_checks() {
        let (adapter, _) = mount(MountConfig::default());
        let dir = adapter.open(&["Content"]).unwrap();
        assert!(matches!(
            adapter.read(dir, 0, 1).await,
            Err(AdapterError::IsADirectory(_))
        ));
        let file = adapter.open(&["game.bin"]).unwrap();
        assert!(matches!(
            adapter.enumerate(file, None),
            Err(AdapterError::NotADirectory(_))
        ));
        assert!(matches!(
            adapter.open(&["game.bin", "x"]),
            Err(AdapterError::PathNotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_handle_rejected() {
        let (adapter, _) = mount(MountConfig::default());
        let h = adapter.open_path("\\Content\\empty.txt").unwrap();
        assert_eq!(adapter.get_attributes(h).unwrap().size, 0);
        adapter.close(h);
        adapter.close(h);
        assert_eq!(adapter.open_handles(), 0);

        let err = adapter.read(h, 0, 1).await.unwrap_err();
        assert_eq!(err.status(), NtStatus::INVALID_HANDLE);
        assert!(matches!(
            adapter.get_attributes(h),
            Err(AdapterError::InvalidHandleState { .. })
        ));
        assert!(adapter.get_security(h).is_err());
        assert!(adapter.enumerate(h, None).is_err());
    }

    #[tokio::test]
    async fn test_enumerate_root() {
        let (adapter, _) = mount(MountConfig::default().with_enumerate_batch(1));
        let root = adapter.open::<&str>(&[]).unwrap();

        let first = adapter.enumerate(root, None).unwrap();
        assert_eq!(first.entries[0].name, "Content");
        let token = first.next.clone().unwrap();

        let second = adapter.enumerate(root, Some(&token)).unwrap();
        assert_eq!(second.entries[0].name, "game.bin");
        assert!(second.next.is_none());

        // Replaying a token gives the same page
        let again = adapter.enumerate(root, Some(&token)).unwrap();
        assert_eq!(again.entries[0].entry, second.entries[0].entry);

        let records = first.dir_infos();
        assert!(records[0].file_info.is_directory());
    }

    #[tokio::test]
    async fn test_security_and_file_info() {
        let (adapter, _) = mount(MountConfig::default());
        let h = adapter.open(&["game.bin"]).unwrap();
        let sd = adapter.get_security(h).unwrap();
        assert_eq!(sd.to_expression(), crate::config::DEFAULT_SECURITY);
        let info = adapter.get_file_info(h).unwrap();
        assert_eq!(info.file_size, 3000);
        assert_eq!(info.allocation_size, 4096);
        assert_eq!(
            info.file_attributes,
            wire::FILE_ATTRIBUTE_ARCHIVE | wire::FILE_ATTRIBUTE_READONLY
        );
    }
}
