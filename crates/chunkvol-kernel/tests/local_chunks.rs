//! Mounting over a directory of chunk files.

use std::sync::Arc;

use chunkvol_kernel::{
    AdapterError, DriverAdapter, LocalChunkSource, Manifest, ManifestEntry, ManifestExtent,
    MountConfig,
};

#[tokio::test]
async fn test_reads_follow_chunk_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(LocalChunkSource::new(dir.path()));

    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::directory("Config", 0),
        ManifestEntry::file("root/Config/Default.ini", 20, 1).with_extents(vec![
            ManifestExtent::mapped(0, 12, 1, 4),
            ManifestExtent::mapped(12, 8, 2, 0),
        ]),
    ]);
    let adapter = DriverAdapter::mount(&manifest, MountConfig::default(), source.clone()).unwrap();
    let handle = adapter.open_path("/config/default.ini").unwrap();

    assert!(matches!(
        adapter.read(handle, 0, 20).await,
        Err(AdapterError::NotYetAvailable { offset: 0, length: 12 })
    ));

    tokio::fs::write(source.chunk_path(1), b"....[Section]\n..").await.unwrap();
    source.notify();
    assert_eq!(adapter.read(handle, 0, 12).await.unwrap(), b"[Section]\n..".to_vec());
    assert!(matches!(
        adapter.read(handle, 0, 20).await,
        Err(AdapterError::NotYetAvailable { offset: 12, length: 8 })
    ));

    tokio::fs::write(source.chunk_path(2), b"Key=1\r\n\0").await.unwrap();
    source.notify();
    let all = adapter.read(handle, 0, 20).await.unwrap();
    assert_eq!(all, b"[Section]\n..Key=1\r\n\0".to_vec());
}
