use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in usbvault.
///
/// Crypto and I/O failures inside the envelope and storage layers are
/// converted to one of these kinds before they reach the session
/// controller.  No variant ever carries secret material.
#[derive(Debug, Error)]
pub enum VaultError {
    // --- Device / enrollment errors ---
    #[error("No key blob found on {0} — run `usbvault enroll` first")]
    NotEnrolled(PathBuf),

    #[error("A key blob already exists at {0} (use --force to overwrite)")]
    AlreadyEnrolled(PathBuf),

    #[error("USB security key is not connected")]
    DeviceAbsent,

    #[error("This USB device is not the one the vault is pinned to")]
    DeviceMismatch,

    #[error("Device fingerprint unavailable: {0}")]
    FingerprintUnavailable(String),

    // --- Authentication errors ---
    #[error("Cannot unlock — wrong password or recovery code")]
    AuthenticationFailed,

    #[error("Too many failed attempts — locked out for {remaining_secs}s")]
    LockedOut { remaining_secs: u64 },

    #[error("Vault is locked")]
    VaultLocked,

    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed — vault file is corrupted or was tampered with")]
    DecryptionFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Storage errors ---
    #[error("INTEGRITY CHECK FAILED for entry {0} — content hash mismatch")]
    IntegrityViolation(String),

    #[error("Vault storage is corrupt: {0}")]
    StorageCorrupt(String),

    #[error("Vault entry '{0}' not found")]
    EntryNotFound(String),

    #[error("Vault id collision for '{0}' — refusing to overwrite an existing entry")]
    IdCollision(String),

    #[error("Secure erase incomplete for {path}: {reason} (file was unlinked)")]
    EraseIncomplete { path: PathBuf, reason: String },

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- Audit errors ---
    #[error("Audit error: {0}")]
    AuditError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,

    #[error("Password mismatch — passwords do not match")]
    PasswordMismatch,
}

impl VaultError {
    /// Returns `true` for conditions that indicate possible tampering or
    /// data loss and must always be shown to the operator.
    pub fn is_tamper_signal(&self) -> bool {
        matches!(
            self,
            VaultError::IntegrityViolation(_)
                | VaultError::StorageCorrupt(_)
                | VaultError::DecryptionFailed
        )
    }
}

/// Convenience type alias for usbvault results.
pub type Result<T> = std::result::Result<T, VaultError>;
