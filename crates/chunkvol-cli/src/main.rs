//! chunkvol: inspect a content manifest and read through the volume it
//! describes.
//!
//! Usage:
//!   chunkvol check manifest.json
//!   chunkvol ls manifest.json '\Engine\Config'
//!   chunkvol stat manifest.json '\Engine\Config\Base.ini'
//!   chunkvol cat manifest.json '\Engine\Config\Base.ini' --chunks ./chunks --wait-ms 5000
//!   chunkvol sddl 'O:SYG:SYD:(A;;FA;;;WD)'
//!
//! Logs go to stderr; set RUST_LOG=debug for per-callback detail.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chunkvol_kernel::{
    AdapterError, DriverAdapter, LocalChunkSource, Manifest, MemoryChunkSource, MountConfig,
    ReadMode, SecurityDescriptor,
};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Largest read issued per callback by `cat`.
const READ_CHUNK: u32 = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "chunkvol")]
#[command(about = "Virtual volume over chunked game content")]
struct Args {
    /// Mount configuration (RON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a manifest and summarize the volume
    Check { manifest: PathBuf },

    /// List a directory
    Ls {
        manifest: PathBuf,
        #[arg(default_value = "\\")]
        path: String,
    },

    /// Show an entry's attributes, security and run list
    Stat { manifest: PathBuf, path: String },

    /// Copy a file's bytes to stdout
    Cat {
        manifest: PathBuf,
        path: String,
        /// Directory of chunk files
        #[arg(long)]
        chunks: PathBuf,
        /// Wait this long for missing data instead of failing at once
        #[arg(long)]
        wait_ms: Option<u64>,
    },

    /// Canonicalize a security expression and show its binary form
    Sddl { expression: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            let config = MountConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            info!(path = %path.display(), read_mode = ?config.read_mode, "loaded mount config");
            config
        }
        None => MountConfig::default(),
    };

    match args.command {
        Command::Check { manifest } => check(&manifest, config).await,
        Command::Ls { manifest, path } => ls(&manifest, &path, config).await,
        Command::Stat { manifest, path } => stat(&manifest, &path, config).await,
        Command::Cat {
            manifest,
            path,
            chunks,
            wait_ms,
        } => {
            let config = match wait_ms {
                Some(ms) => config.with_read_mode(ReadMode::block(Duration::from_millis(ms))),
                None => config,
            };
            cat(&manifest, &path, &chunks, config).await
        }
        Command::Sddl { expression } => sddl(&expression),
    }
}

/// Mount without any chunk data; enough for metadata commands.
async fn mount_metadata(manifest: &Path, config: MountConfig) -> Result<DriverAdapter> {
    let manifest = Manifest::load(manifest)
        .await
        .with_context(|| format!("loading manifest {}", manifest.display()))?;
    let adapter = DriverAdapter::mount(&manifest, config, Arc::new(MemoryChunkSource::new()))?;
    Ok(adapter)
}

async fn check(manifest: &Path, config: MountConfig) -> Result<()> {
    let adapter = mount_metadata(manifest, config).await?;
    let namespace = adapter.namespace();
    let (mut files, mut dirs, mut bytes) = (0usize, 0usize, 0u64);
    for (_, entry) in namespace.iter() {
        if entry.is_dir() {
            dirs += 1;
        } else {
            files += 1;
            bytes += entry.size();
        }
    }
    println!("entries:     {}", namespace.len());
    println!("directories: {dirs}");
    println!("files:       {files}");
    println!("bytes:       {bytes}");
    println!("descriptors: {}", namespace.descriptors().len());
    for (id, descriptor) in namespace.descriptors().iter() {
        let digest = namespace.descriptors().digest_hex(id).unwrap_or_default();
        println!("  {id} {} {}", &digest[..digest.len().min(16)], descriptor.to_expression());
    }
    Ok(())
}

async fn ls(manifest: &Path, path: &str, config: MountConfig) -> Result<()> {
    let adapter = mount_metadata(manifest, config).await?;
    let handle = adapter.open_path(path)?;
    let mut token = None;
    loop {
        let batch = adapter.enumerate(handle, token.as_ref())?;
        for entry in &batch.entries {
            let kind = if entry.attributes.is_dir() { "d" } else { "-" };
            println!("{kind} {:>14} {}", entry.attributes.size, entry.name);
        }
        match batch.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    adapter.close(handle);
    Ok(())
}

async fn stat(manifest: &Path, path: &str, config: MountConfig) -> Result<()> {
    let adapter = mount_metadata(manifest, config).await?;
    let entry = adapter.namespace().resolve_path(path)?;
    let handle = adapter.open_path(path)?;
    let attrs = adapter.get_attributes(handle)?;
    let info = adapter.get_file_info(handle)?;

    println!("path:       {}", adapter.namespace().path_of(entry).unwrap_or_default());
    println!("kind:       {:?}", attrs.kind);
    println!("size:       {}", attrs.size);
    println!("allocation: {}", attrs.allocation_size);
    println!("index:      {}", attrs.index_number);
    println!("attributes: {:#06x}", info.file_attributes);
    println!("written:    {}", info.last_write_time);
    println!("security:   {} {}", attrs.security_id, attrs.security.to_expression());
    match adapter.namespace().run_list(entry) {
        Some(Ok(runs)) => println!("run list:   {}", hex::encode(runs)),
        Some(Err(e)) => {
            warn!(error = %e, "run list cannot be encoded");
            println!("run list:   not encodable ({e})");
        }
        None if attrs.is_dir() => {}
        None => println!("run list:   not yet known"),
    }
    adapter.close(handle);
    Ok(())
}

async fn cat(manifest: &Path, path: &str, chunks: &Path, config: MountConfig) -> Result<()> {
    let manifest = Manifest::load(manifest)
        .await
        .with_context(|| format!("loading manifest {}", manifest.display()))?;
    let source = Arc::new(LocalChunkSource::new(chunks));
    let adapter = DriverAdapter::mount(&manifest, config, source)?;

    let handle = adapter.open_path(path)?;
    let attrs = adapter.get_attributes(handle)?;
    if attrs.is_dir() {
        bail!("{path} is a directory");
    }
    let size = attrs.size;
    info!(path, size, read_mode = ?adapter.config().read_mode, "copying to stdout");

    let mut stdout = tokio::io::stdout();
    let mut offset = 0;
    while offset < size {
        let bytes = match adapter.read(handle, offset, READ_CHUNK).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if matches!(e, AdapterError::NotYetAvailable { .. }) {
                    warn!(path, offset, "data not downloaded yet; retry later or pass --wait-ms");
                }
                return Err(e).with_context(|| format!("reading {path} at {offset}"));
            }
        };
        stdout.write_all(&bytes).await?;
        offset += bytes.len() as u64;
    }
    stdout.flush().await?;
    adapter.close(handle);
    Ok(())
}

fn sddl(expression: &str) -> Result<()> {
    let descriptor = SecurityDescriptor::from_expression(expression)?;
    println!("{}", descriptor.to_expression());
    println!("{}", hex::encode(descriptor.as_bytes()));
    Ok(())
}
