//! Reads that wait for the chunk source under `ReadMode::Block`.
//!
//! These run on a paused clock, so timeouts elapse as soon as every task is
//! idle.

use std::sync::Arc;
use std::time::Duration;

use chunkvol_kernel::{
    AdapterError, DriverAdapter, Manifest, ManifestEntry, ManifestExtent, MemoryChunkSource,
    MountConfig, NtStatus, ReadMode,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Route adapter logs to the test harness; `RUST_LOG=debug` shows the waits.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mount(read_mode: ReadMode) -> (DriverAdapter, Arc<MemoryChunkSource>) {
    init_tracing();
    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::directory("Paks", 0),
        ManifestEntry::file("base.pak", 2048, 1).with_extents(vec![
            ManifestExtent::mapped(0, 1024, 3, 0),
            ManifestExtent::sparse(1024, 1024),
        ]),
    ]);
    let source = Arc::new(MemoryChunkSource::new());
    let config = MountConfig::default().with_read_mode(read_mode);
    let adapter = DriverAdapter::mount(&manifest, config, source.clone()).unwrap();
    (adapter, source)
}

#[tokio::test(start_paused = true)]
async fn test_block_waits_for_chunk() {
    let (adapter, source) = mount(ReadMode::block(Duration::from_secs(30)));
    let handle = adapter.open(&["Paks", "base.pak"]).unwrap();

    let (read, ()) = tokio::join!(adapter.read(handle, 100, 50), async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        source.insert_chunk(3, vec![0x42; 1024]);
    });
    assert_eq!(read.unwrap(), vec![0x42; 50]);
}

#[tokio::test(start_paused = true)]
async fn test_block_ignores_unrelated_changes() {
    let (adapter, source) = mount(ReadMode::block(Duration::from_secs(30)));
    let handle = adapter.open(&["Paks", "base.pak"]).unwrap();

    let (read, ()) = tokio::join!(adapter.read(handle, 0, 16), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.insert_chunk(99, vec![0; 16]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.insert_chunk(3, (0..=255).cycle().take(1024).collect());
    });
    assert_eq!(read.unwrap(), (0..16).collect::<Vec<u8>>());
}

#[tokio::test(start_paused = true)]
async fn test_block_times_out() {
    let (adapter, _source) = mount(ReadMode::block(Duration::from_millis(500)));
    let handle = adapter.open(&["Paks", "base.pak"]).unwrap();

    let started = tokio::time::Instant::now();
    let err = adapter.read(handle, 1024, 10).await.unwrap_err();
    assert_eq!(err, AdapterError::NotYetAvailable { offset: 1024, length: 10 });
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_bounds_whole_read() {
    init_tracing();
    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::file("split.pak", 2048, 0).with_extents(vec![
            ManifestExtent::mapped(0, 1024, 3, 0),
            ManifestExtent::mapped(1024, 1024, 4, 0),
        ]),
    ]);
    let source = Arc::new(MemoryChunkSource::new());
    let config = MountConfig::default().with_read_mode(ReadMode::block(Duration::from_millis(500)));
    let adapter = DriverAdapter::mount(&manifest, config, source.clone()).unwrap();
    let handle = adapter.open(&["split.pak"]).unwrap();

    // The first chunk lands just before the deadline; the second never does.
    let started = tokio::time::Instant::now();
    let (read, ()) = tokio::join!(adapter.read(handle, 0, 2048), async {
        tokio::time::sleep(Duration::from_millis(450)).await;
        source.insert_chunk(3, vec![1; 1024]);
    });
    let waited = started.elapsed();

    assert_eq!(
        read.unwrap_err(),
        AdapterError::NotYetAvailable { offset: 1024, length: 1024 }
    );
    assert!(waited >= Duration::from_millis(500), "waited {waited:?}");
    assert!(waited < Duration::from_millis(550), "waited {waited:?} with a 500ms timeout");
}

#[tokio::test(start_paused = true)]
async fn test_block_cancelled() {
    let (adapter, _source) = mount(ReadMode::block(Duration::from_secs(60)));
    let handle = adapter.open(&["Paks", "base.pak"]).unwrap();
    let cancel = CancellationToken::new();

    let (read, ()) = tokio::join!(
        adapter.read_cancellable(handle, 1500, 10, &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();
        }
    );
    let err = read.unwrap_err();
    assert_eq!(err, AdapterError::Cancelled);
    assert_eq!(err.status(), NtStatus::CANCELLED);

    // The handle survives cancellation.
    assert!(adapter.get_attributes(handle).is_ok());
}

#[tokio::test]
async fn test_cancelled_before_read() {
    let (adapter, source) = mount(ReadMode::block(Duration::from_secs(60)));
    source.insert_chunk(3, vec![1; 1024]);
    let handle = adapter.open(&["Paks", "base.pak"]).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(
        adapter.read_cancellable(handle, 0, 4, &cancel).await,
        Err(AdapterError::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_block_sparse_range_arrives() {
    let (adapter, source) = mount(ReadMode::block(Duration::from_secs(5)));
    let handle = adapter.open(&["Paks", "base.pak"]).unwrap();
    let entry = adapter.namespace().resolve(&["Paks", "base.pak"]).unwrap();
    source.insert_chunk(3, vec![7; 1024]);

    let (read, ()) = tokio::join!(adapter.read(handle, 1000, 48), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        source.insert_range(entry, 1024, vec![9; 1024]);
    });
    let bytes = read.unwrap();
    assert_eq!(&bytes[..24], &[7; 24]);
    assert_eq!(&bytes[24..], &[9; 24]);
}
