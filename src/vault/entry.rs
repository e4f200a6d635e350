//! Vault entries: the index record kept for every stored file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters in a `vault_id`.
pub const VAULT_ID_LEN: usize = 16;

/// Extension of ciphertext files inside the vault directory.
pub const STORAGE_EXTENSION: &str = "enc";

/// A single file stored in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    /// Short identifier shown to the operator (16 hex chars).
    pub vault_id: String,

    /// Name of the file when it was added (no directory part).
    pub original_name: String,

    /// Name of the ciphertext file inside the vault directory.
    pub storage_filename: String,

    /// When the file was added.
    pub added_at: DateTime<Utc>,

    /// Plaintext size in bytes.
    pub size_bytes: u64,

    /// Hex SHA-256 of the plaintext, checked on every extract.
    pub content_hash: String,
}

/// Identifiers derived for a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryNames {
    pub vault_id: String,
    pub storage_filename: String,
}

impl EntryNames {
    /// Derive the storage name and id from `original_name` and the insertion time.
    ///
    /// Both come from one SHA-256 over the name and the timestamp in
    /// nanoseconds; the id is its first `VAULT_ID_LEN` hex characters.
    pub fn derive(original_name: &str, added_at: DateTime<Utc>) -> Self {
        let stamp = added_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| added_at.timestamp_micros());

        let mut hasher = Sha256::new();
        hasher.update(original_name.as_bytes());
        hasher.update(stamp.to_string().as_bytes());
        let stem = hex::encode(hasher.finalize());

        Self {
            vault_id: stem[..VAULT_ID_LEN].to_string(),
            storage_filename: format!("{stem}.{STORAGE_EXTENSION}"),
        }
    }
}

/// Hex SHA-256 of a plaintext buffer.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
