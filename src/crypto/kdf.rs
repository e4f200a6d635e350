//! Password-based key derivation using PBKDF2-HMAC-SHA256.
//!
//! Both secrets that can unlock the vault (the password and the recovery
//! code) are stretched with PBKDF2 into independent 256-bit wrapping keys.
//! The iteration count is configurable via `Pbkdf2Params` (loaded from
//! `config.toml` or defaulted) but can never drop below `MIN_ITERATIONS`.

use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::KEY_LEN;
use crate::errors::{Result, VaultError};

/// Length of the salt in bytes (256 bits).
pub const SALT_LEN: usize = 32;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 480_000;

/// Minimum safe iteration count.
pub const MIN_ITERATIONS: u32 = 450_000;

/// Configurable PBKDF2 parameters.
///
/// The iteration count is not stored in the key blob, so the value used
/// to open a blob must match the one used to create it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pbkdf2Params {
    /// Number of HMAC-SHA256 iterations (default: 480 000).
    pub iterations: u32,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl Pbkdf2Params {
    /// Reject parameters weaker than `MIN_ITERATIONS`.
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(VaultError::KeyDerivationFailed(format!(
                "PBKDF2 iterations must be at least {MIN_ITERATIONS} (got {})",
                self.iterations
            )));
        }
        Ok(())
    }
}

/// Derive a 32-byte wrapping key from a secret and salt.
///
/// The same secret + salt + params always produce the same key.  The key
/// is returned in a `Zeroizing` buffer so it is wiped when dropped.
pub fn derive_key(
    secret: &[u8],
    salt: &[u8],
    params: &Pbkdf2Params,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    params.validate()?;

    if salt.len() != SALT_LEN {
        return Err(VaultError::KeyDerivationFailed(format!(
            "salt must be {SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, params.iterations, &mut key[..]);

    Ok(key)
}

/// Generate a cryptographically random 32-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}
