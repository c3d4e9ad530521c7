use super::*;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("passgen-storage-{}", uuid::Uuid::new_v4()))
}

// =============================================================================
// MemoryStorage
// =============================================================================

#[test]
fn memory_storage_missing_key_is_none() {
    let storage = MemoryStorage::new();
    assert_eq!(storage.get_item("nope").unwrap(), None);
}

#[test]
fn memory_storage_set_then_get() {
    let storage = MemoryStorage::new();
    storage.set_item("k", "v").unwrap();
    assert_eq!(storage.get_item("k").unwrap(), Some("v".to_owned()));
}

#[test]
fn memory_storage_remove_clears_key() {
    let storage = MemoryStorage::new();
    storage.set_item("k", "v").unwrap();
    storage.remove_item("k").unwrap();
    storage.remove_item("k").unwrap();
    assert_eq!(storage.get_item("k").unwrap(), None);
}

// =============================================================================
// FileStorage
// =============================================================================

#[test]
fn file_storage_missing_file_reads_as_empty() {
    let dir = temp_dir();
    let storage = FileStorage::open(&dir);
    assert_eq!(storage.get_item("k").unwrap(), None);
    assert!(!storage.path().exists());
}

#[test]
fn file_storage_persists_across_instances() {
    let dir = temp_dir();
    FileStorage::open(&dir).set_item("passgen_guest_count", "2").unwrap();

    let reopened = FileStorage::open(&dir);
    assert_eq!(reopened.get_item("passgen_guest_count").unwrap(), Some("2".to_owned()));

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn file_storage_keeps_other_keys_on_write() {
    let dir = temp_dir();
    let storage = FileStorage::open(&dir);
    storage.set_item("a", "1").unwrap();
    storage.set_item("b", "2").unwrap();
    storage.remove_item("a").unwrap();

    assert_eq!(storage.get_item("a").unwrap(), None);
    assert_eq!(storage.get_item("b").unwrap(), Some("2".to_owned()));
    assert!(!dir.join("storage.json.tmp").exists());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn file_storage_blank_file_reads_as_empty() {
    let dir = temp_dir();
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(STORAGE_FILE_NAME), "  \n").unwrap();

    let storage = FileStorage::open(&dir);
    assert_eq!(storage.get_item("k").unwrap(), None);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn file_storage_corrupt_file_is_an_error() {
    let dir = temp_dir();
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(STORAGE_FILE_NAME), "{not json").unwrap();

    let storage = FileStorage::open(&dir);
    let err = storage.get_item("k").unwrap_err();
    assert!(matches!(err, StorageError::Corrupt(_)));

    fs::remove_dir_all(&dir).unwrap();
}
