//! Master key handling and the per-session vault cipher.
//!
//! The master key is 32 random bytes generated at enrollment.  It never
//! touches disk in plaintext; it only exists inside a `MasterKey`, which
//! zeroes its memory on drop.
//!
//! Vault content is not encrypted with the master key directly.  HKDF
//! (RFC 5869) expands it once into a dedicated file-encryption key, held
//! by a `VaultCipher` that serves both vault files and the vault index.

use std::fmt;

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use super::encryption::{decrypt, encrypt};
use crate::errors::{Result, VaultError};

/// Length of the master key and derived sub-keys (256 bits).
pub const KEY_LEN: usize = 32;

/// HKDF context string binding the derived key to vault content.
const FILE_KEY_INFO: &[u8] = b"usbvault-file-key-v1";

/// A wrapper around a 32-byte master key that automatically zeroes
/// its memory when dropped.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Create a new `MasterKey` from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh master key from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        let key = Self::new(bytes);
        bytes.zeroize();
        key
    }

    /// Access the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// The authenticated cipher bound to one unlocked session.
///
/// Built once from the master key; the caller drops the master key as
/// soon as this exists.  The derived key is zeroed when the cipher is
/// dropped.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct VaultCipher {
    file_key: [u8; KEY_LEN],
}

impl VaultCipher {
    /// Derive the file-encryption key from `master_key`.
    pub fn from_master_key(master_key: &MasterKey) -> Result<Self> {
        // Unsalted: the master key is uniformly random.
        let hk = Hkdf::<Sha256>::new(None, master_key.as_bytes());

        let mut file_key = [0u8; KEY_LEN];
        hk.expand(FILE_KEY_INFO, &mut file_key)
            .map_err(|e| VaultError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

        Ok(Self { file_key })
    }

    /// Encrypt arbitrary bytes (nonce || ciphertext || tag).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        encrypt(&self.file_key, plaintext)
    }

    /// Decrypt bytes produced by `encrypt`.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        decrypt(&self.file_key, ciphertext)
    }
}

impl fmt::Debug for VaultCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultCipher(..)")
    }
}
