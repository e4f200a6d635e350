//! The encrypted vault index: `vault_id -> VaultEntry`.
//!
//! On disk the index is a single AEAD blob (`nonce || ct || tag`) of the
//! JSON-serialized map, sealed under the session cipher.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use zeroize::Zeroizing;

use super::entry::VaultEntry;
use super::fsio::write_private_atomic;
use crate::crypto::VaultCipher;
use crate::errors::{Result, VaultError};

/// In-memory vault index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VaultIndex {
    entries: BTreeMap<String, VaultEntry>,
}

/// What `VaultIndex::load` found on disk.
#[derive(Debug)]
pub struct IndexLoad {
    pub index: VaultIndex,
    /// Set when the existing index could not be read and was moved aside.
    pub quarantined: Option<PathBuf>,
}

impl VaultIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the index at `path`.
    ///
    /// A missing file is an empty index.  A file that fails to decrypt or
    /// parse is renamed to `<path>.corrupt-<unix_ts>` (with `-N` appended
    /// when that name is taken) and an empty index is returned along with
    /// the quarantine path.  If the rename itself fails
    /// the open is refused with `StorageCorrupt`, so nothing ever writes
    /// over the unreadable file.
    pub fn load(path: &Path, cipher: &VaultCipher) -> Result<IndexLoad> {
        if !path.exists() {
            return Ok(IndexLoad {
                index: Self::new(),
                quarantined: None,
            });
        }

        let data = fs::read(path)?;
        match Self::decode(&data, cipher) {
            Ok(index) => Ok(IndexLoad {
                index,
                quarantined: None,
            }),
            Err(e) => {
                let target = quarantine_path(path);
                fs::rename(path, &target).map_err(|rename_err| {
                    VaultError::StorageCorrupt(format!(
                        "index {} is unreadable ({e}) and could not be moved aside: {rename_err}",
                        path.display()
                    ))
                })?;
                tracing::error!(
                    index = %path.display(),
                    quarantine = %target.display(),
                    "vault index unreadable; moved aside"
                );
                Ok(IndexLoad {
                    index: Self::new(),
                    quarantined: Some(target),
                })
            }
        }
    }

    fn decode(data: &[u8], cipher: &VaultCipher) -> Result<Self> {
        let plaintext = Zeroizing::new(cipher.decrypt(data)?);
        let entries: BTreeMap<String, VaultEntry> = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::SerializationError(format!("vault index: {e}")))?;
        Ok(Self { entries })
    }

    /// Encrypt the index and atomically replace the file at `path`.
    pub fn persist(&self, path: &Path, cipher: &VaultCipher) -> Result<()> {
        let json = Zeroizing::new(
            serde_json::to_vec(&self.entries)
                .map_err(|e| VaultError::SerializationError(format!("vault index: {e}")))?,
        );
        let sealed = cipher.encrypt(&json)?;
        write_private_atomic(path, &sealed)
    }

    pub fn get(&self, vault_id: &str) -> Option<&VaultEntry> {
        self.entries.get(vault_id)
    }

    pub fn contains(&self, vault_id: &str) -> bool {
        self.entries.contains_key(vault_id)
    }

    /// Insert a new entry; an existing id is never replaced.
    pub fn insert(&mut self, entry: VaultEntry) -> Result<()> {
        if self.entries.contains_key(&entry.vault_id) {
            return Err(VaultError::IdCollision(entry.vault_id));
        }
        self.entries.insert(entry.vault_id.clone(), entry);
        Ok(())
    }

    pub fn remove(&mut self, vault_id: &str) -> Option<VaultEntry> {
        self.entries.remove(vault_id)
    }

    /// Returns `true` if any entry already uses `storage_filename`.
    pub fn uses_storage_name(&self, storage_filename: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.storage_filename == storage_filename)
    }

    pub fn entries(&self) -> impl Iterator<Item = &VaultEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// First free `<name>.corrupt-<unix_ts>[-N]` next to `path`.
fn quarantine_path(path: &Path) -> PathBuf {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    let base = format!("{name}.corrupt-{}", Utc::now().timestamp());

    let mut target = path.with_file_name(&base);
    let mut n = 1u32;
    while target.symlink_metadata().is_ok() {
        target = path.with_file_name(format!("{base}-{n}"));
        n += 1;
    }
    target
}
