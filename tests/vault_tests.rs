//! Integration tests for the storage engine.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use usbvault::crypto::{MasterKey, VaultCipher};
use usbvault::errors::VaultError;
use usbvault::vault::VaultStore;

const INDEX: &str = ".vault_index";

fn open_store(dir: &Path, key: &MasterKey) -> VaultStore {
    let store = VaultStore::new(dir, INDEX, 1);
    store
        .open(VaultCipher::from_master_key(key).unwrap())
        .unwrap();
    store
}

// ---------------------------------------------------------------------------
// Add / list / extract / delete
// ---------------------------------------------------------------------------

#[test]
fn add_then_extract_returns_identical_bytes() {
    let vault = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let key = MasterKey::generate();
    let store = open_store(&vault.path().join("v"), &key);

    let source = work.path().join("note.txt");
    fs::write(&source, b"0123456789").unwrap();

    let outcome = store.add_file(&source, true).unwrap();
    assert!(outcome.warning.is_none());
    assert_eq!(outcome.entry.original_name, "note.txt");
    assert_eq!(outcome.entry.size_bytes, 10);
    assert!(!source.exists(), "source should be erased");

    let out_dir = work.path().join("out");
    fs::create_dir(&out_dir).unwrap();
    let written = store.extract(&outcome.entry.vault_id, &out_dir).unwrap();
    assert_eq!(written.file_name().unwrap(), "note.txt");
    assert_eq!(fs::read(&written).unwrap(), b"0123456789");

    // A second extract never overwrites the first.
    let again = store.extract(&outcome.entry.vault_id, &out_dir).unwrap();
    assert_ne!(again, written);
    assert_eq!(fs::read(&again).unwrap(), b"0123456789");
}

#[test]
fn keep_source_leaves_the_original() {
    let vault = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let store = open_store(vault.path(), &MasterKey::generate());

    let source = work.path().join("keep.bin");
    fs::write(&source, b"keep me").unwrap();

    store.add_file(&source, false).unwrap();
    assert_eq!(fs::read(&source).unwrap(), b"keep me");
}

#[test]
fn ciphertext_on_disk_does_not_contain_plaintext() {
    let vault = TempDir::new().unwrap();
    let store = open_store(vault.path(), &MasterKey::generate());

    let entry = store
        .add_bytes(b"the quick brown fox", "fox.txt")
        .unwrap();
    let stored = fs::read(vault.path().join(&entry.storage_filename)).unwrap();

    assert!(!stored
        .windows(b"quick".len())
        .any(|w| w == b"quick"));
    let index = fs::read(vault.path().join(INDEX)).unwrap();
    assert!(!index.windows(b"fox.txt".len()).any(|w| w == b"fox.txt"));
}

#[test]
fn entries_survive_close_and_reopen() {
    let vault = TempDir::new().unwrap();
    let key = MasterKey::generate();

    let id = {
        let store = open_store(vault.path(), &key);
        let entry = store.add_bytes(b"persisted", "a.txt").unwrap();
        store.close();
        assert!(matches!(store.list(), Err(VaultError::VaultLocked)));
        entry.vault_id
    };

    let store = open_store(vault.path(), &key);
    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].vault_id, id);
}

#[test]
fn list_is_newest_first() {
    let vault = TempDir::new().unwrap();
    let store = open_store(vault.path(), &MasterKey::generate());

    let first = store.add_bytes(b"1", "first.txt").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = store.add_bytes(b"2", "second.txt").unwrap();

    let listed = store.list().unwrap();
    assert_eq!(listed[0].vault_id, second.vault_id);
    assert_eq!(listed[1].vault_id, first.vault_id);
}

#[test]
fn delete_erases_ciphertext_and_entry() {
    let vault = TempDir::new().unwrap();
    let store = open_store(vault.path(), &MasterKey::generate());

    let entry = store.add_bytes(b"secret", "s.txt").unwrap();
    let stored = vault.path().join(&entry.storage_filename);
    assert!(stored.exists());

    let outcome = store.delete(&entry.vault_id).unwrap();
    assert_eq!(outcome.entry.vault_id, entry.vault_id);
    assert!(outcome.warning.is_none());
    assert!(!stored.exists());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn unknown_id_leaves_the_index_untouched() {
    let vault = TempDir::new().unwrap();
    let store = open_store(vault.path(), &MasterKey::generate());
    store.add_bytes(b"x", "x.txt").unwrap();

    let index_before = fs::read(vault.path().join(INDEX)).unwrap();

    assert!(matches!(
        store.delete("deadbeefdeadbeef"),
        Err(VaultError::EntryNotFound(_))
    ));
    assert!(matches!(
        store.extract("deadbeefdeadbeef", vault.path()),
        Err(VaultError::EntryNotFound(_))
    ));

    assert_eq!(fs::read(vault.path().join(INDEX)).unwrap(), index_before);
    assert_eq!(store.entry_count(), Some(1));
}

// ---------------------------------------------------------------------------
// Tampering
// ---------------------------------------------------------------------------

#[test]
fn flipped_ciphertext_byte_fails_to_decrypt() {
    let vault = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let store = open_store(vault.path(), &MasterKey::generate());

    let entry = store.add_bytes(b"0123456789", "note.txt").unwrap();
    let stored = vault.path().join(&entry.storage_filename);
    let mut bytes = fs::read(&stored).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;
    fs::write(&stored, &bytes).unwrap();

    let err = store.extract(&entry.vault_id, out.path()).unwrap_err();
    assert!(err.is_tamper_signal(), "got {err:?}");
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn swapped_ciphertexts_fail_the_integrity_check() {
    let vault = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let store = open_store(vault.path(), &MasterKey::generate());

    let a = store.add_bytes(b"contents of a", "a.txt").unwrap();
    let b = store.add_bytes(b"contents of b", "b.txt").unwrap();
    fs::copy(
        vault.path().join(&b.storage_filename),
        vault.path().join(&a.storage_filename),
    )
    .unwrap();

    assert!(matches!(
        store.extract(&a.vault_id, out.path()),
        Err(VaultError::IntegrityViolation(id)) if id == a.vault_id
    ));
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn missing_ciphertext_is_hidden_from_list_and_corrupt_on_extract() {
    let vault = TempDir::new().unwrap();
    let store = open_store(vault.path(), &MasterKey::generate());

    let entry = store.add_bytes(b"gone", "gone.txt").unwrap();
    fs::remove_file(vault.path().join(&entry.storage_filename)).unwrap();

    assert!(store.list().unwrap().is_empty());
    assert!(matches!(
        store.extract(&entry.vault_id, vault.path()),
        Err(VaultError::StorageCorrupt(_))
    ));
}

#[test]
fn unreadable_index_is_quarantined_on_open() {
    let vault = TempDir::new().unwrap();
    {
        let store = open_store(vault.path(), &MasterKey::generate());
        store.add_bytes(b"old", "old.txt").unwrap();
    }

    // A different key cannot read the index.
    let store = VaultStore::new(vault.path(), INDEX, 1);
    let report = store
        .open(VaultCipher::from_master_key(&MasterKey::generate()).unwrap())
        .unwrap();

    let moved = report.quarantined_index.clone().expect("index quarantined");
    assert!(moved.exists());
    assert!(moved
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(".vault_index.corrupt-"));
    assert!(matches!(report.warning(), Some(VaultError::StorageCorrupt(_))));
    assert_eq!(report.entry_count, 0);
    assert!(store.list().unwrap().is_empty());
}

#[cfg(unix)]
#[test]
fn vault_files_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let vault = TempDir::new().unwrap();
    let dir = vault.path().join("v");
    let store = open_store(&dir, &MasterKey::generate());
    let entry = store.add_bytes(b"x", "x.txt").unwrap();

    let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&dir), 0o700);
    assert_eq!(mode(&dir.join(INDEX)), 0o600);
    assert_eq!(mode(&dir.join(&entry.storage_filename)), 0o600);
}
