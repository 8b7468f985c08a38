//! End-to-end mount scenarios through the driver adapter.

use std::sync::Arc;

use chunkvol_kernel::{
    AdapterError, ChunkLocator, DriverAdapter, EntryKind, Extent, ExtentMap, HandlePhase,
    Manifest, ManifestEntry, ManifestExtent, MemoryChunkSource, MountConfig, NtStatus,
};

fn test_folder_manifest() -> Manifest {
    Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::directory("root/test folder", 0),
        ManifestEntry::file("root/test folder/testfile.txt", 524_288_000, 1),
        ManifestEntry::directory("root/test.folder", 0),
    ])
}

fn mount(manifest: &Manifest, config: MountConfig) -> (DriverAdapter, Arc<MemoryChunkSource>) {
    let source = Arc::new(MemoryChunkSource::new());
    let adapter = DriverAdapter::mount(manifest, config, source.clone()).unwrap();
    (adapter, source)
}

#[test]
fn test_folder_manifest_resolves() {
    let (adapter, _) = mount(&test_folder_manifest(), MountConfig::default());

    let dir = adapter.open(&["test folder"]).unwrap();
    assert_eq!(adapter.get_attributes(dir).unwrap().kind, EntryKind::Directory);

    let file = adapter.open(&["test folder", "testfile.txt"]).unwrap();
    let attrs = adapter.get_attributes(file).unwrap();
    assert_eq!(attrs.kind, EntryKind::File);
    assert_eq!(attrs.size, 524_288_000);

    let info = adapter.get_file_info(file).unwrap();
    assert_eq!(info.file_size, 524_288_000);
    assert!(!info.is_directory());

    let dot = adapter.open(&["test.folder"]).unwrap();
    assert!(adapter.enumerate(dot, None).unwrap().entries.is_empty());
}

#[test]
fn test_embedded_separator_is_invalid_name() {
    let (adapter, _) = mount(&test_folder_manifest(), MountConfig::default());
    let err = adapter.open(&["test folder\\testfile.txt"]).unwrap_err();
    assert!(matches!(err, AdapterError::InvalidName(_)));
    assert_eq!(err.status(), NtStatus::OBJECT_NAME_INVALID);

    let err = adapter.open(&["test folder/testfile.txt"]).unwrap_err();
    assert!(matches!(err, AdapterError::InvalidName(_)));

    let err = adapter.open(&["missing.txt"]).unwrap_err();
    assert_eq!(err.status(), NtStatus::OBJECT_NAME_NOT_FOUND);
}

#[tokio::test]
async fn test_sparse_range_fails_fast_then_succeeds() {
    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::file("data.pak", 3000, 0).with_extents(vec![
            ManifestExtent::mapped(0, 1000, 0, 0),
            ManifestExtent::sparse(1000, 1000),
            ManifestExtent::mapped(2000, 1000, 1, 0),
        ]),
    ]);
    let (adapter, source) = mount(&manifest, MountConfig::default());
    let handle = adapter.open(&["data.pak"]).unwrap();
    let entry = adapter.namespace().resolve(&["data.pak"]).unwrap();

    let err = adapter.read(handle, 1500, 100).await.unwrap_err();
    assert_eq!(err, AdapterError::NotYetAvailable { offset: 1500, length: 100 });

    let content: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
    source.insert_range(entry, 1000, content.clone());

    let bytes = adapter.read(handle, 1500, 100).await.unwrap();
    assert_eq!(bytes, content[500..600]);
}

#[tokio::test]
async fn test_read_across_extents() {
    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::file("data.pak", 3000, 0).with_extents(vec![
            ManifestExtent::mapped(0, 1000, 4, 100),
            ManifestExtent::sparse(1000, 1000),
            ManifestExtent::mapped(2000, 1000, 5, 0),
        ]),
    ]);
    let (adapter, source) = mount(&manifest, MountConfig::default());
    let entry = adapter.namespace().resolve(&["data.pak"]).unwrap();

    source.insert_chunk(4, vec![1; 1100]);
    source.insert_range(entry, 1000, vec![2; 1000]);
    source.insert_chunk(5, vec![3; 1000]);

    let handle = adapter.open(&["data.pak"]).unwrap();
    let bytes = adapter.read(handle, 0, 3000).await.unwrap();
    assert_eq!(bytes.len(), 3000);
    assert!(bytes[..1000].iter().all(|b| *b == 1));
    assert!(bytes[1000..2000].iter().all(|b| *b == 2));
    assert!(bytes[2000..].iter().all(|b| *b == 3));
}

#[tokio::test]
async fn test_lazy_extent_map_resolved_once() {
    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::file("lazy.bin", 8192, 0),
    ]);
    let (adapter, source) = mount(&manifest, MountConfig::default());
    let entry = adapter.namespace().resolve(&["lazy.bin"]).unwrap();
    assert!(adapter.namespace().entry(entry).unwrap().extent_map().is_none());

    let map =
        ExtentMap::from_extents(8192, [Extent::mapped(0, 8192, ChunkLocator::new(9, 0))]).unwrap();
    source.set_extents(entry, map.clone());
    source.insert_chunk(9, vec![0x5A; 8192]);

    let handle = adapter.open(&["lazy.bin"]).unwrap();
    assert_eq!(adapter.read(handle, 4096, 16).await.unwrap(), vec![0x5A; 16]);
    assert_eq!(adapter.namespace().entry(entry).unwrap().extent_map(), Some(&map));

    // Later maps from the source are ignored.
    source.set_extents(entry, ExtentMap::sparse(8192));
    assert_eq!(adapter.read(handle, 0, 4).await.unwrap(), vec![0x5A; 4]);

    // The run list is available once resolved: 2 clusters at lcn 9 * 256.
    let run_list = adapter.namespace().run_list(entry).unwrap().unwrap();
    assert_eq!(run_list, vec![0x21, 0x02, 0x00, 0x09, 0x00]);
}

#[tokio::test]
async fn test_unresolvable_file_reads_as_pending() {
    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::file("lazy.bin", 100, 0),
    ]);
    let (adapter, source) = mount(&manifest, MountConfig::default());
    let entry = adapter.namespace().resolve(&["lazy.bin"]).unwrap();
    // Wrong size: ignored in favour of a sparse map
    source.set_extents(entry, ExtentMap::sparse(50));

    let handle = adapter.open(&["lazy.bin"]).unwrap();
    assert!(matches!(
        adapter.read(handle, 0, 10).await,
        Err(AdapterError::NotYetAvailable { .. })
    ));
    let map = adapter.namespace().entry(entry).unwrap().extent_map().unwrap();
    assert_eq!(map.size(), 100);
    assert!(!map.is_fully_mapped());
}

#[tokio::test]
async fn test_source_failure_leaves_handle_usable() {
    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::file("a.bin", 10, 0).with_extents(vec![ManifestExtent::mapped(0, 10, 0, 0)]),
    ]);
    let (adapter, source) = mount(&manifest, MountConfig::default());
    let entry = adapter.namespace().resolve(&["a.bin"]).unwrap();
    source.insert_chunk(0, b"0123456789".to_vec());
    source.fail_entry(entry, "cache volume offline");

    let handle = adapter.open(&["a.bin"]).unwrap();
    let err = adapter.read(handle, 0, 10).await.unwrap_err();
    assert!(matches!(err, AdapterError::SourceUnavailable(_)));
    assert_eq!(err.status(), NtStatus::DEVICE_DATA_ERROR);
    assert_eq!(adapter.phase(handle).unwrap(), HandlePhase::Opened);

    source.clear_failure(entry);
    assert_eq!(adapter.read(handle, 2, 3).await.unwrap(), b"234".to_vec());
}

#[test]
fn test_bad_manifest_aborts_mount() {
    let manifest = Manifest::new(vec![
        ManifestEntry::root("root"),
        ManifestEntry::file("a", 1, 0),
        ManifestEntry::file("A", 1, 0),
    ]);
    let source = Arc::new(MemoryChunkSource::new());
    let err = DriverAdapter::mount(&manifest, MountConfig::default(), source).unwrap_err();
    assert!(err.to_string().contains("entry 2"));
}

#[test]
fn test_manifest_json_mount() {
    let manifest = Manifest::from_json_str(
        r#"{ "entries": [
            { "name": "root", "is_directory": true },
            { "name": "Engine", "is_directory": true, "parent": 0,
              "security": "O:SYG:SYD:P(A;OICI;FA;;;SY)" },
            { "name": "Engine.ini", "size": 12, "parent": 1, "modified": 1700000000 }
        ] }"#,
    )
    .unwrap();
    let source = Arc::new(MemoryChunkSource::new());
    let adapter = DriverAdapter::mount(&manifest, MountConfig::default(), source).unwrap();

    let engine = adapter.open_path("\\engine").unwrap();
    assert_eq!(
        adapter.get_security(engine).unwrap().to_expression(),
        "O:SYG:SYD:P(A;OICI;FA;;;SY)"
    );
    let ini = adapter.open_path("\\Engine\\ENGINE.INI").unwrap();
    assert_ne!(
        adapter.get_attributes(ini).unwrap().security_id,
        adapter.get_attributes(engine).unwrap().security_id
    );
    assert_eq!(adapter.namespace().descriptors().len(), 2);
}
