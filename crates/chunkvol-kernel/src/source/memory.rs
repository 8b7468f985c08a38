//! In-memory chunk source whose availability can be changed at runtime.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;

use super::{ChunkSource, FetchRequest, Fetched, SourceError};
use crate::extent::ExtentMap;
use crate::namespace::EntryRef;

#[derive(Default)]
struct MemoryState {
    /// Chunk contents, by chunk index.
    chunks: HashMap<u32, Vec<u8>>,
    /// Loose file ranges served for sparse requests: entry -> (offset, bytes).
    ranges: HashMap<u32, Vec<(u64, Vec<u8>)>>,
    /// Maps handed out for unresolved files.
    extents: HashMap<u32, ExtentMap>,
    /// Entries whose fetches fail.
    failing: HashMap<u32, String>,
}

/// Chunk source backed by memory.
pub struct MemoryChunkSource {
    state: RwLock<MemoryState>,
    generation: watch::Sender<u64>,
}

impl Default for MemoryChunkSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChunkSource {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            state: RwLock::new(MemoryState::default()),
            generation,
        }
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Make a whole chunk available.
    pub fn insert_chunk(&self, chunk: u32, data: Vec<u8>) {
        self.state.write().chunks.insert(chunk, data);
        self.bump();
    }

    /// Forget a chunk, making it pending again.
    pub fn remove_chunk(&self, chunk: u32) {
        self.state.write().chunks.remove(&chunk);
        self.bump();
    }

    /// Make bytes available for a file range that has no chunk location.
    pub fn insert_range(&self, entry: EntryRef, offset: u64, data: Vec<u8>) {
        self.state
            .write()
            .ranges
            .entry(entry.id())
            .or_default()
            .push((offset, data));
        self.bump();
    }

    /// Extent map returned when a read first touches an unresolved file.
    pub fn set_extents(&self, entry: EntryRef, map: ExtentMap) {
        self.state.write().extents.insert(entry.id(), map);
    }

    /// Make every fetch for `entry` fail until [`clear_failure`](Self::clear_failure).
    pub fn fail_entry(&self, entry: EntryRef, reason: impl Into<String>) {
        self.state.write().failing.insert(entry.id(), reason.into());
    }

    pub fn clear_failure(&self, entry: EntryRef) {
        self.state.write().failing.remove(&entry.id());
        self.bump();
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

fn window(data: &[u8], start: u64, length: u64) -> Option<Vec<u8>> {
    let start = usize::try_from(start).ok()?;
    let end = start.checked_add(usize::try_from(length).ok()?)?;
    data.get(start..end).map(<[u8]>::to_vec)
}

#[async_trait]
impl ChunkSource for MemoryChunkSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Fetched, SourceError> {
        let state = self.state.read();
        if let Some(reason) = state.failing.get(&request.entry.id()) {
            return Err(SourceError::unavailable(reason.clone()));
        }

        match request.locator {
            Some(locator) => {
                let Some(chunk) = state.chunks.get(&locator.chunk) else {
                    return Ok(Fetched::Pending);
                };
                window(chunk, locator.offset, request.length)
                    .map(Fetched::Ready)
                    .ok_or_else(|| {
                        SourceError::corrupt(format!(
                            "chunk {} is {} bytes, wanted {}+{}",
                            locator.chunk,
                            chunk.len(),
                            locator.offset,
                            request.length
                        ))
                    })
            }
            None => {
                let ranges = state.ranges.get(&request.entry.id());
                let found = ranges.into_iter().flatten().find_map(|(offset, data)| {
                    let start = request.file_offset.checked_sub(*offset)?;
                    window(data, start, request.length)
                });
                Ok(found.map_or(Fetched::Pending, Fetched::Ready))
            }
        }
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    async fn resolve_extents(&self, entry: EntryRef, _size: u64) -> Option<ExtentMap> {
        self.state.read().extents.get(&entry.id()).cloned()
    }
}
