use mediabuf_core::config::{HeapConfig, PrimaryBackend, SpillKind};
use mediabuf_core::limits::MIN_HEAP_SIZE;
use mediabuf_heap::{Storage, StoreKind};
use mediabuf_io::{build_spill_storage, open_heap, Error, FsStorage, MemoryStorage};

fn spill_config(root: &str) -> HeapConfig {
    HeapConfig::new(MIN_HEAP_SIZE, PrimaryBackend::Arena)
        .with_spill(SpillKind::File, 50)
        .with_spill_root(root)
}

#[test]
fn test_file_storage_builder_write_read() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().to_string();

    let storage = build_spill_storage(&spill_config(&root)).expect("fs storage");
    assert!(storage.exists(&root).unwrap());

    let path = format!("{}/segment.hfh", root);
    let bytes = b"hello world";
    storage.write(&path, bytes).expect("write");
    let roundtrip = storage.read_range(&path, 0, bytes.len()).expect("read");
    assert_eq!(roundtrip, bytes);
    assert_eq!(storage.list(&root).unwrap(), vec![path.clone()]);

    storage.delete(&path).unwrap();
    assert!(!storage.exists(&path).unwrap());
}

#[test]
fn test_invalid_scheme_errors() {
    let err = build_spill_storage(&spill_config("ftp://example.com/spill"))
        .err()
        .expect("should fail");
    assert!(err.to_string().contains("unsupported spill scheme"));

    let err = open_heap(&spill_config("ftp://example.com/spill"))
        .err()
        .expect("should fail");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_memory_root_spills_in_process() {
    let mut heap = open_heap(&spill_config("memory://spill")).expect("memory heap");
    heap.alloc(30_000).unwrap();
    let spilled = heap.alloc(20_000).unwrap();
    assert_eq!(heap.backend_of(spilled).unwrap(), StoreKind::File);

    let m = heap.map(spilled).unwrap();
    heap.bytes_mut(&m).unwrap()[..4].copy_from_slice(b"mbuf");
    heap.unmap(m).unwrap();

    let m = heap.map(spilled).unwrap();
    assert_eq!(&heap.bytes(&m).unwrap()[..4], b"mbuf");
    heap.unmap(m).unwrap();
}

#[test]
fn test_missing_root_is_a_heap_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let err = open_heap(&spill_config(&missing.to_string_lossy()))
        .err()
        .expect("missing root");
    assert!(matches!(err, Error::Heap(mediabuf_heap::Error::Config(_))));
}

#[test]
fn test_open_heap_without_spill() {
    let config = HeapConfig::new(MIN_HEAP_SIZE, PrimaryBackend::Native);
    let mut heap = open_heap(&config).expect("plain heap");
    let h = heap.alloc(1024).unwrap();
    assert_eq!(heap.backend_of(h).unwrap(), StoreKind::Native);
    assert_eq!(heap.stats().spill_limit, 0);
}

#[test]
fn test_open_heap_wires_a_device_session() {
    let config = HeapConfig::new(MIN_HEAP_SIZE, PrimaryBackend::Arena).with_spill(SpillKind::Device, 50);
    let mut heap = open_heap(&config).expect("device heap");
    heap.alloc(30_000).unwrap();
    let spilled = heap.alloc(30_000).unwrap();
    assert_eq!(heap.backend_of(spilled).unwrap(), StoreKind::Device);
}

#[test]
fn test_storages_share_contents_across_clones() {
    let storage = MemoryStorage::new();
    let clone = storage.clone();
    clone.write("a/1.hfh", b"x").unwrap();
    assert!(storage.contains("a/1.hfh"));
    assert!(storage.exists("a").unwrap());
    assert_eq!(storage.size("a/1.hfh").unwrap(), 1);

    let fs = FsStorage::new();
    assert!(fs.read_range("/definitely/not/here.hfh", 0, 1).is_err());
    fs.delete("/definitely/not/here.hfh").unwrap();
}
