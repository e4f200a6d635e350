//! Cryptographic primitives for usbvault.
//!
//! This module provides:
//! - AES-256-GCM encryption and decryption (`encryption`)
//! - PBKDF2-HMAC-SHA256 password-based key derivation (`kdf`)
//! - The zeroizing master key and the HKDF-derived session cipher (`keys`)
//! - Recovery code generation and normalization (`recovery`)

pub mod encryption;
pub mod kdf;
pub mod keys;
pub mod recovery;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{encrypt, decrypt, derive_key, ...};
pub use encryption::{decrypt, encrypt};
pub use kdf::{derive_key, generate_salt, Pbkdf2Params};
pub use keys::{MasterKey, VaultCipher};
pub use recovery::{generate_recovery_code, normalize_recovery_code};
