//! Key envelope: the master key wrapped twice on the USB device.
//!
//! Enrollment generates a random master key and a recovery code, derives
//! one wrapping key from the password and another from the recovery code
//! (PBKDF2, independent salts), and seals `version || master_key` under
//! each.  Either secret alone re-derives its wrapping key and unwraps the
//! same master key.
//!
//! Once the blob file exists, every way an unlock can go wrong (truncated
//! blob, unknown version, bad tag, bad inner version) is reported as the
//! same `AuthenticationFailed`.

pub mod format;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::config::Settings;
use crate::crypto::encryption::{self, generate_nonce};
use crate::crypto::kdf::{derive_key, generate_salt, Pbkdf2Params, SALT_LEN};
use crate::crypto::keys::{MasterKey, KEY_LEN};
use crate::crypto::recovery::{generate_recovery_code, normalize_recovery_code};
use crate::errors::{Result, VaultError};

pub use format::{KeyBlob, BLOB_VERSION};

/// Which secret the operator is presenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Password,
    RecoveryCode,
}

impl SecretKind {
    pub fn is_recovery(self) -> bool {
        matches!(self, SecretKind::RecoveryCode)
    }
}

/// Creates and opens key blobs on a device root.
#[derive(Debug, Clone)]
pub struct KeyEnvelope {
    key_file_name: String,
    kdf: Pbkdf2Params,
}

impl KeyEnvelope {
    pub fn new(key_file_name: impl Into<String>, kdf: Pbkdf2Params) -> Self {
        Self {
            key_file_name: key_file_name.into(),
            kdf,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.key_file_name.clone(), settings.pbkdf2_params())
    }

    /// Full path of the key blob on the given device root.
    pub fn key_path(&self, device_root: &Path) -> PathBuf {
        device_root.join(&self.key_file_name)
    }

    /// Returns `true` if the device root carries a key blob.
    pub fn is_enrolled(&self, device_root: &Path) -> bool {
        self.key_path(device_root).is_file()
    }

    pub fn key_file_name(&self) -> &str {
        &self.key_file_name
    }

    /// Enroll a device: write a fresh key blob and return the recovery code.
    ///
    /// The recovery code is returned exactly once and is not written
    /// anywhere.  An existing blob is only replaced when `overwrite` is set,
    /// and the replacement is atomic (temp file + rename).
    pub fn create(
        &self,
        device_root: &Path,
        password: &[u8],
        overwrite: bool,
    ) -> Result<Zeroizing<String>> {
        self.kdf.validate()?;

        if !device_root.is_dir() {
            return Err(VaultError::DeviceAbsent);
        }

        let key_path = self.key_path(device_root);
        if key_path.exists() && !overwrite {
            return Err(VaultError::AlreadyEnrolled(key_path));
        }

        // 1. Fresh random material.
        let master_key = MasterKey::generate();
        let recovery_code = generate_recovery_code();
        let salt_password = generate_salt();
        let salt_recovery = generate_salt();
        let nonce = generate_nonce();

        // 2. Two independent wrapping keys.  The shared nonce below is only
        //    acceptable because these keys differ.
        let key_password = derive_key(password, &salt_password, &self.kdf)?;
        let key_recovery = derive_key(recovery_code.as_bytes(), &salt_recovery, &self.kdf)?;

        // 3. Seal `version || master_key` under each key, salt as AAD.
        let mut payload = Zeroizing::new(Vec::with_capacity(1 + KEY_LEN));
        payload.push(BLOB_VERSION);
        payload.extend_from_slice(master_key.as_bytes());

        let wrapped_password =
            encryption::seal(&key_password[..], &nonce, &payload, &salt_password)?;
        let wrapped_recovery =
            encryption::seal(&key_recovery[..], &nonce, &payload, &salt_recovery)?;

        let blob = KeyBlob {
            salt_password,
            salt_recovery,
            nonce,
            wrapped_password,
            wrapped_recovery,
        };

        // 4. Persist atomically.
        write_blob(&key_path, &blob.to_bytes()?)?;

        tracing::debug!(path = %key_path.display(), "key blob written");
        Ok(recovery_code)
    }

    /// Unwrap the master key with a password or recovery code.
    pub fn open(&self, device_root: &Path, secret: &str, kind: SecretKind) -> Result<MasterKey> {
        self.kdf.validate()?;

        let key_path = self.key_path(device_root);
        if !key_path.is_file() {
            return Err(VaultError::NotEnrolled(key_path));
        }

        let data = fs::read(&key_path)?;

        let normalized;
        let secret_bytes: &[u8] = match kind {
            SecretKind::Password => secret.as_bytes(),
            SecretKind::RecoveryCode => {
                normalized = normalize_recovery_code(secret);
                normalized.as_bytes()
            }
        };

        let blob = match KeyBlob::parse(&data) {
            Ok(blob) => blob,
            Err(_) => {
                // Spend the same derivation a real attempt would, so a
                // damaged blob cannot be told apart by timing.
                let _ = derive_key(secret_bytes, &[0u8; SALT_LEN], &self.kdf)?;
                return Err(VaultError::AuthenticationFailed);
            }
        };

        let (salt, wrapped) = match kind {
            SecretKind::Password => (&blob.salt_password, &blob.wrapped_password),
            SecretKind::RecoveryCode => (&blob.salt_recovery, &blob.wrapped_recovery),
        };

        let key = derive_key(secret_bytes, salt, &self.kdf)?;

        let payload = Zeroizing::new(
            encryption::open(&key[..], &blob.nonce, wrapped, salt)
                .map_err(|_| VaultError::AuthenticationFailed)?,
        );

        if payload.len() != 1 + KEY_LEN || payload[0] != BLOB_VERSION {
            return Err(VaultError::AuthenticationFailed);
        }

        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(&payload[1..]);
        Ok(MasterKey::new(*bytes))
    }
}

/// Write the blob via a temp file in the same directory, then rename.
fn write_blob(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        "{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    let written = (|| -> Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    #[cfg(windows)]
    hide_file_best_effort(path);

    Ok(())
}

/// Mark the blob hidden on Windows so it does not clutter the drive root.
#[cfg(windows)]
fn hide_file_best_effort(path: &Path) {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN};

    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    // SAFETY: `wide` is a NUL-terminated UTF-16 path that outlives the call.
    let ok = unsafe { SetFileAttributesW(wide.as_ptr(), FILE_ATTRIBUTE_HIDDEN) };
    if ok == 0 {
        tracing::debug!(path = %path.display(), "could not mark key blob hidden");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn envelope() -> KeyEnvelope {
        KeyEnvelope::new(".vault.key", Pbkdf2Params::default())
    }

    #[test]
    fn create_refuses_missing_device_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not-mounted");
        let result = envelope().create(&missing, b"password123", false);
        assert!(matches!(result, Err(VaultError::DeviceAbsent)));
    }

    #[test]
    fn open_without_blob_is_not_enrolled() {
        let dir = TempDir::new().unwrap();
        let result = envelope().open(dir.path(), "whatever", SecretKind::Password);
        assert!(matches!(result, Err(VaultError::NotEnrolled(_))));
    }

    #[test]
    fn garbage_blob_is_authentication_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".vault.key"), b"not a key blob").unwrap();

        for kind in [SecretKind::Password, SecretKind::RecoveryCode] {
            let result = envelope().open(dir.path(), "whatever", kind);
            assert!(matches!(result, Err(VaultError::AuthenticationFailed)));
        }
    }

    #[test]
    fn weak_kdf_params_are_rejected_before_touching_the_device() {
        let dir = TempDir::new().unwrap();
        let weak = KeyEnvelope::new(".vault.key", Pbkdf2Params { iterations: 10 });
        let result = weak.create(dir.path(), b"password123", false);
        assert!(matches!(result, Err(VaultError::KeyDerivationFailed(_))));
        assert!(!dir.path().join(".vault.key").exists());
    }

    #[test]
    fn blob_has_expected_size_and_no_temp_file_left() {
        let dir = TempDir::new().unwrap();
        let env = envelope();
        env.create(dir.path(), b"correcthorsebattery", false).unwrap();

        let bytes = fs::read(env.key_path(dir.path())).unwrap();
        assert_eq!(bytes.len(), format::PREFIX_LEN + 2 * format::WRAPPED_LEN);
        assert!(!dir.path().join(".vault.key.tmp").exists());
    }

    #[test]
    fn failed_blob_write_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join(".vault.key");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), b"").unwrap();

        assert!(write_blob(&target, b"blob").is_err());
        assert!(!dir.path().join(".vault.key.tmp").exists());
    }
}
