//! Chunks stored as files in a local directory.
//!
//! Chunk `n` lives at `<root>/<n as 8 hex digits>.chunk`. A missing file, or
//! one too short for the requested window, is still downloading and reads
//! as pending. Whoever writes the files calls [`LocalChunkSource::notify`].

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tracing::trace;

use super::{ChunkSource, FetchRequest, Fetched, SourceError};

/// Chunk source reading a directory of chunk files.
pub struct LocalChunkSource {
    root: PathBuf,
    generation: watch::Sender<u64>,
}

impl LocalChunkSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            root: root.into(),
            generation,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding a chunk.
    pub fn chunk_path(&self, chunk: u32) -> PathBuf {
        self.root.join(format!("{chunk:08x}.chunk"))
    }

    /// Signal that chunk files changed.
    pub fn notify(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

#[async_trait]
impl ChunkSource for LocalChunkSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Fetched, SourceError> {
        // Sparse ranges have no file to read from.
        let Some(locator) = request.locator else {
            return Ok(Fetched::Pending);
        };
        let path = self.chunk_path(locator.chunk);
        let length = usize::try_from(request.length)
            .map_err(|_| SourceError::corrupt(format!("read of {} bytes", request.length)))?;

        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(path = %path.display(), "chunk not present");
                return Ok(Fetched::Pending);
            }
            Err(e) => return Err(e.into()),
        };

        let available = file.metadata().await?.len();
        if locator.offset.saturating_add(request.length) > available {
            return Ok(Fetched::Pending);
        }

        file.seek(SeekFrom::Start(locator.offset)).await?;
        let mut buffer = vec![0u8; length];
        match file.read_exact(&mut buffer).await {
            Ok(_) => Ok(Fetched::Ready(buffer)),
            // Truncated between the size check and the read
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(Fetched::Pending),
            Err(e) => Err(e.into()),
        }
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
