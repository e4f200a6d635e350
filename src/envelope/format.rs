//! Binary key blob format.
//!
//! The blob stored on the USB device has this layout:
//!
//! ```text
//! [version: 1][salt_pw: 32][salt_recovery: 32][nonce: 12][ct_pw_len: 2 BE][ct_pw][ct_recovery]
//! ```
//!
//! - **Version**: format version (currently `3`).
//! - **Salts**: independent PBKDF2 salts for the password and recovery keys.
//! - **Nonce**: one AES-GCM nonce shared by both wrapped payloads.  Sharing
//!   is only sound because each payload is sealed under its own
//!   independently derived key.
//! - **ct_pw / ct_recovery**: `version || master_key` sealed under the
//!   password-derived and recovery-derived keys respectively.

use crate::crypto::encryption::{NONCE_LEN, TAG_LEN};
use crate::crypto::kdf::SALT_LEN;
use crate::crypto::keys::KEY_LEN;
use crate::errors::{Result, VaultError};

/// Current binary format version.
pub const BLOB_VERSION: u8 = 0x03;

/// Fixed-size prefix: version + two salts + nonce + length field.
pub const PREFIX_LEN: usize = 1 + SALT_LEN + SALT_LEN + NONCE_LEN + 2;

/// Size of the sealed payload: version byte + master key + tag.
pub const WRAPPED_LEN: usize = 1 + KEY_LEN + TAG_LEN;

/// Parsed contents of a key blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlob {
    pub salt_password: [u8; SALT_LEN],
    pub salt_recovery: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub wrapped_password: Vec<u8>,
    pub wrapped_recovery: Vec<u8>,
}

impl KeyBlob {
    /// Serialize the blob to its on-device byte layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let ct_len = u16::try_from(self.wrapped_password.len()).map_err(|_| {
            VaultError::SerializationError(format!(
                "wrapped payload length {} exceeds u16::MAX",
                self.wrapped_password.len()
            ))
        })?;

        let total = PREFIX_LEN + self.wrapped_password.len() + self.wrapped_recovery.len();
        let mut buf = Vec::with_capacity(total);

        buf.push(BLOB_VERSION);
        buf.extend_from_slice(&self.salt_password);
        buf.extend_from_slice(&self.salt_recovery);
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&ct_len.to_be_bytes());
        buf.extend_from_slice(&self.wrapped_password);
        buf.extend_from_slice(&self.wrapped_recovery);

        Ok(buf)
    }

    /// Parse a blob read from the device.
    ///
    /// Every structural problem is reported as `AuthenticationFailed`; the
    /// caller must not be able to tell a damaged blob from a wrong secret.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PREFIX_LEN {
            return Err(VaultError::AuthenticationFailed);
        }

        if data[0] != BLOB_VERSION {
            return Err(VaultError::AuthenticationFailed);
        }

        let mut off = 1;
        let salt_password = take_array::<SALT_LEN>(data, &mut off)?;
        let salt_recovery = take_array::<SALT_LEN>(data, &mut off)?;
        let nonce = take_array::<NONCE_LEN>(data, &mut off)?;
        let ct_len = usize::from(u16::from_be_bytes(take_array::<2>(data, &mut off)?));

        let rest = &data[off..];
        if ct_len == 0 || ct_len >= rest.len() {
            return Err(VaultError::AuthenticationFailed);
        }
        let (wrapped_password, wrapped_recovery) = rest.split_at(ct_len);

        Ok(Self {
            salt_password,
            salt_recovery,
            nonce,
            wrapped_password: wrapped_password.to_vec(),
            wrapped_recovery: wrapped_recovery.to_vec(),
        })
    }
}

fn take_array<const N: usize>(data: &[u8], off: &mut usize) -> Result<[u8; N]> {
    let end = *off + N;
    let slice = data
        .get(*off..end)
        .ok_or(VaultError::AuthenticationFailed)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    *off = end;
    Ok(out)
}
