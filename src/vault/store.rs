//! The storage engine: encrypted vault files plus the encrypted index.
//!
//! `VaultStore` is either closed or open with a session cipher.  All
//! methods take `&self`; the open state lives behind an `RwLock` so the
//! session controller can close the store from the reactor thread while a
//! foreground operation is running.  Index mutation is serialized by a
//! mutex, and there is a single writer per vault directory.
//!
//! An operation that races a `close()` never commits: it checks the
//! `closed` flag while holding the index mutex, right before the index
//! write, and fails with `VaultLocked` instead.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::entry::{content_hash, EntryNames, VaultEntry};
use super::erase::{secure_erase, EraseOutcome};
use super::fsio::{create_private_dir, write_private_atomic};
use super::index::VaultIndex;
use crate::config::Settings;
use crate::crypto::VaultCipher;
use crate::errors::{Result, VaultError};

/// Result of opening the store.
#[derive(Debug)]
pub struct OpenReport {
    pub entry_count: usize,
    /// Where an unreadable index was moved, if one was found.
    pub quarantined_index: Option<PathBuf>,
}

impl OpenReport {
    /// The `StorageCorrupt` condition to surface, if the index was quarantined.
    pub fn warning(&self) -> Option<VaultError> {
        self.quarantined_index.as_ref().map(|p| {
            VaultError::StorageCorrupt(format!(
                "vault index could not be decrypted; moved to {} and started empty",
                p.display()
            ))
        })
    }
}

/// Result of a successful add.
#[derive(Debug)]
pub struct AddOutcome {
    pub entry: VaultEntry,
    /// Problem erasing the source file; the entry itself is committed.
    pub warning: Option<VaultError>,
}

/// Result of a successful delete.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub entry: VaultEntry,
    /// `EraseIncomplete` when the ciphertext was unlinked but not fully overwritten.
    pub warning: Option<VaultError>,
}

struct OpenVault {
    cipher: VaultCipher,
    index: Mutex<VaultIndex>,
    closed: AtomicBool,
}

impl OpenVault {
    fn lock_index(&self) -> MutexGuard<'_, VaultIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(VaultError::VaultLocked)
        } else {
            Ok(())
        }
    }
}

/// Handle to the vault directory.
pub struct VaultStore {
    vault_dir: PathBuf,
    index_path: PathBuf,
    erase_passes: u32,
    session: RwLock<Option<Arc<OpenVault>>>,
}

impl VaultStore {
    pub fn new(vault_dir: impl Into<PathBuf>, index_file_name: &str, erase_passes: u32) -> Self {
        let vault_dir = vault_dir.into();
        Self {
            index_path: vault_dir.join(index_file_name),
            vault_dir,
            erase_passes: erase_passes.max(1),
            session: RwLock::new(None),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.vault_dir.clone(),
            &settings.index_file_name,
            settings.erase_passes,
        )
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bind the session cipher and load the index.
    ///
    /// Creates the vault directory (owner-only) on first use.  Opening an
    /// already-open store closes the previous session first.
    pub fn open(&self, cipher: VaultCipher) -> Result<OpenReport> {
        self.close();
        create_private_dir(&self.vault_dir)?;

        let load = VaultIndex::load(&self.index_path, &cipher)?;
        let report = OpenReport {
            entry_count: load.index.len(),
            quarantined_index: load.quarantined,
        };

        let vault = Arc::new(OpenVault {
            cipher,
            index: Mutex::new(load.index),
            closed: AtomicBool::new(false),
        });
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(vault);

        tracing::debug!(entries = report.entry_count, "vault store opened");
        Ok(report)
    }

    /// Discard the cipher and the decrypted index.
    ///
    /// Safe to call when already closed.  An operation still holding the
    /// session finishes with `VaultLocked`; the cipher is zeroed when it
    /// lets go.
    pub fn close(&self) {
        let taken = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(vault) = taken {
            vault.closed.store(true, Ordering::SeqCst);
            vault.lock_index().clear();
            tracing::debug!("vault store closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn active(&self) -> Result<Arc<OpenVault>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(VaultError::VaultLocked)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Encrypt `data` into the vault under `original_name`.
    pub fn add_bytes(&self, data: &[u8], original_name: &str) -> Result<VaultEntry> {
        let vault = self.active()?;
        let original_name = sanitize_name(original_name)?;

        let hash = content_hash(data);
        let ciphertext = vault.cipher.encrypt(data)?;

        let mut index = vault.lock_index();
        vault.ensure_open()?;

        let added_at = Utc::now();
        let names = EntryNames::derive(&original_name, added_at);
        let storage_path = self.vault_dir.join(&names.storage_filename);

        if index.contains(&names.vault_id)
            || index.uses_storage_name(&names.storage_filename)
            || storage_path.exists()
        {
            return Err(VaultError::IdCollision(names.vault_id));
        }

        write_private_atomic(&storage_path, &ciphertext)?;

        let entry = VaultEntry {
            vault_id: names.vault_id,
            original_name,
            storage_filename: names.storage_filename,
            added_at,
            size_bytes: data.len() as u64,
            content_hash: hash,
        };

        let committed = (|| -> Result<()> {
            vault.ensure_open()?;
            index.insert(entry.clone())?;
            if let Err(e) = index.persist(&self.index_path, &vault.cipher) {
                index.remove(&entry.vault_id);
                return Err(e);
            }
            Ok(())
        })();

        if let Err(e) = committed {
            let _ = fs::remove_file(&storage_path);
            return Err(e);
        }

        tracing::debug!(vault_id = %entry.vault_id, size = entry.size_bytes, "file added");
        Ok(entry)
    }

    /// Read `source` into the vault, then securely erase it if `wipe_source`.
    pub fn add_file(&self, source: &Path, wipe_source: bool) -> Result<AddOutcome> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                VaultError::CommandFailed(format!("{} is not a file", source.display()))
            })?;

        let data = Zeroizing::new(fs::read(source)?);
        let entry = self.add_bytes(&data, &name)?;

        let warning = if wipe_source {
            match secure_erase(source, self.erase_passes) {
                EraseOutcome::Complete => None,
                EraseOutcome::Incomplete { reason } => Some(VaultError::EraseIncomplete {
                    path: source.to_path_buf(),
                    reason,
                }),
                EraseOutcome::Failed { error } => {
                    tracing::warn!(path = %source.display(), error = %error, "source file left in place");
                    Some(VaultError::Io(error))
                }
            }
        } else {
            None
        };

        Ok(AddOutcome { entry, warning })
    }

    /// Entries newest first.  Entries whose ciphertext is gone are skipped.
    pub fn list(&self) -> Result<Vec<VaultEntry>> {
        let vault = self.active()?;
        let index = vault.lock_index();
        vault.ensure_open()?;

        let mut entries: Vec<VaultEntry> = index
            .entries()
            .filter(|e| self.vault_dir.join(&e.storage_filename).is_file())
            .cloned()
            .collect();
        drop(index);

        entries.sort_by(|a, b| {
            b.added_at
                .cmp(&a.added_at)
                .then_with(|| a.vault_id.cmp(&b.vault_id))
        });
        Ok(entries)
    }

    /// Decrypt an entry into `dest_dir` and return the written path.
    ///
    /// The content hash is checked before anything is written.  An
    /// existing file is never overwritten; `name_1.ext`, `name_2.ext`, …
    /// are tried instead.
    pub fn extract(&self, vault_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        let vault = self.active()?;
        let entry = vault
            .lock_index()
            .get(vault_id)
            .cloned()
            .ok_or_else(|| VaultError::EntryNotFound(vault_id.to_string()))?;

        let storage_path = self.vault_dir.join(&entry.storage_filename);
        let ciphertext = match fs::read(&storage_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VaultError::StorageCorrupt(format!(
                    "ciphertext for entry {vault_id} is missing"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let plaintext = Zeroizing::new(vault.cipher.decrypt(&ciphertext)?);

        let actual = content_hash(&plaintext);
        if !bool::from(actual.as_bytes().ct_eq(entry.content_hash.as_bytes())) {
            return Err(VaultError::IntegrityViolation(vault_id.to_string()));
        }

        vault.ensure_open()?;
        let output = write_unique(dest_dir, &entry.original_name, &plaintext)?;

        tracing::debug!(vault_id, "file extracted");
        Ok(output)
    }

    /// Securely erase an entry's ciphertext and drop it from the index.
    ///
    /// An unknown id leaves the index untouched.  If the ciphertext cannot
    /// be unlinked the entry is kept and the I/O error returned; if it was
    /// unlinked after a failed overwrite the entry is removed and the
    /// outcome carries an `EraseIncomplete` warning.
    pub fn delete(&self, vault_id: &str) -> Result<DeleteOutcome> {
        let vault = self.active()?;
        let mut index = vault.lock_index();
        vault.ensure_open()?;

        let entry = index
            .get(vault_id)
            .cloned()
            .ok_or_else(|| VaultError::EntryNotFound(vault_id.to_string()))?;

        let storage_path = self.vault_dir.join(&entry.storage_filename);
        let warning = if storage_path.exists() {
            secure_erase(&storage_path, self.erase_passes).into_warning(&storage_path)?
        } else {
            tracing::warn!(vault_id, "ciphertext already missing; dropping entry");
            None
        };

        vault.ensure_open()?;
        index.remove(vault_id);
        // The ciphertext is gone by now, so the entry stays out of memory.
        // The stale copy in the on-disk index is skipped by `list` and
        // dropped by the next successful persist.
        index.persist(&self.index_path, &vault.cipher)?;

        tracing::debug!(vault_id, "file deleted");
        Ok(DeleteOutcome { entry, warning })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of entries in the index, or `None` when closed.
    pub fn entry_count(&self) -> Option<usize> {
        self.active().ok().map(|v| v.lock_index().len())
    }

    pub fn vault_dir(&self) -> &Path {
        &self.vault_dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

/// Keep only the final path component of a caller-supplied name.
fn sanitize_name(name: &str) -> Result<String> {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| VaultError::CommandFailed(format!("invalid file name '{name}'")))
}

/// Create a new file in `dir` named after `name`, adding `_N` before the
/// extension until the name is free.
fn write_unique(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let base = Path::new(name);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = base.extension().map(|e| e.to_string_lossy().into_owned());

    let mut counter = 0u32;
    loop {
        let candidate = if counter == 0 {
            dir.join(name)
        } else {
            match &ext {
                Some(ext) => dir.join(format!("{stem}_{counter}.{ext}")),
                None => dir.join(format!("{stem}_{counter}")),
            }
        };

        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                let written = file.write_all(data).and_then(|()| file.sync_all());
                if let Err(e) = written {
                    drop(file);
                    let _ = fs::remove_file(&candidate);
                    return Err(e.into());
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MasterKey;
    use tempfile::TempDir;

    fn cipher() -> VaultCipher {
        VaultCipher::from_master_key(&MasterKey::new([7u8; 32])).unwrap()
    }

    fn open_store(dir: &Path) -> VaultStore {
        let store = VaultStore::new(dir.join("vault"), ".vault_index", 1);
        store.open(cipher()).unwrap();
        store
    }

    #[test]
    fn closed_store_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let store = VaultStore::new(dir.path().join("vault"), ".vault_index", 1);

        assert!(!store.is_open());
        assert!(matches!(store.list(), Err(VaultError::VaultLocked)));
        assert!(matches!(
            store.add_bytes(b"x", "x.txt"),
            Err(VaultError::VaultLocked)
        ));
        assert!(store.entry_count().is_none());
    }

    #[test]
    fn add_extract_delete() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());

        let entry = store.add_bytes(b"0123456789", "note.txt").unwrap();
        assert_eq!(entry.size_bytes, 10);
        assert_eq!(store.list().unwrap(), vec![entry.clone()]);

        let out = store.extract(&entry.vault_id, dir.path()).unwrap();
        assert_eq!(out, dir.path().join("note.txt"));
        assert_eq!(fs::read(&out).unwrap(), b"0123456789");

        let deleted = store.delete(&entry.vault_id).unwrap();
        assert!(deleted.warning.is_none());
        assert!(store.list().unwrap().is_empty());
        assert!(!store
            .vault_dir()
            .join(&entry.storage_filename)
            .exists());
    }

    #[test]
    fn extract_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let entry = store.add_bytes(b"data", "report.pdf").unwrap();

        fs::write(dir.path().join("report.pdf"), b"existing").unwrap();
        fs::write(dir.path().join("report_1.pdf"), b"existing").unwrap();

        let out = store.extract(&entry.vault_id, dir.path()).unwrap();
        assert_eq!(out, dir.path().join("report_2.pdf"));
        assert_eq!(fs::read(dir.path().join("report.pdf")).unwrap(), b"existing");
    }

    #[test]
    fn added_names_are_reduced_to_file_name() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let entry = store.add_bytes(b"x", "../../etc/passwd").unwrap();
        assert_eq!(entry.original_name, "passwd");
    }

    #[test]
    fn missing_ciphertext_is_hidden_from_list() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let entry = store.add_bytes(b"x", "a.txt").unwrap();

        fs::remove_file(store.vault_dir().join(&entry.storage_filename)).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.entry_count(), Some(1));

        // Deleting it still succeeds and clears the entry.
        store.delete(&entry.vault_id).unwrap();
        assert_eq!(store.entry_count(), Some(0));
    }

    #[test]
    fn close_discards_index_and_blocks_operations() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let entry = store.add_bytes(b"x", "a.txt").unwrap();

        store.close();
        store.close();
        assert!(!store.is_open());
        assert!(matches!(
            store.extract(&entry.vault_id, dir.path()),
            Err(VaultError::VaultLocked)
        ));

        // Reopening with the same key restores the entry.
        store.open(cipher()).unwrap();
        assert_eq!(store.entry_count(), Some(1));
    }

    #[test]
    fn delete_with_unwritable_index_drops_the_entry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let entry = store.add_bytes(b"x", "a.txt").unwrap();

        // A non-empty directory where the index goes makes the rename fail.
        fs::remove_file(store.index_path()).unwrap();
        fs::create_dir(store.index_path()).unwrap();
        fs::write(store.index_path().join("blocker"), b"").unwrap();

        assert!(store.delete(&entry.vault_id).is_err());
        assert!(!store
            .vault_dir()
            .join(&entry.storage_filename)
            .exists());
        assert_eq!(store.entry_count(), Some(0));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn write_unique_without_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README"), b"x").unwrap();
        let out = write_unique(dir.path(), "README", b"y").unwrap();
        assert_eq!(out, dir.path().join("README_1"));
    }
}
