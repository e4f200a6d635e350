//! Device fingerprinting.
//!
//! The fingerprint is the hex SHA-256 of `serial|vendor|product|fs_uuid`
//! for the block device behind a mount point.  It only exists where the
//! platform exposes that metadata (Linux sysfs and `/dev/disk/by-uuid`);
//! anywhere else, or when every field is empty, fingerprinting fails
//! closed with `FingerprintUnavailable`.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::{Result, VaultError};

/// Hardware and filesystem identifiers of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial: String,
    pub vendor: String,
    pub product: String,
    pub fs_uuid: String,
}

impl DeviceIdentity {
    pub fn is_empty(&self) -> bool {
        self.serial.is_empty()
            && self.vendor.is_empty()
            && self.product.is_empty()
            && self.fs_uuid.is_empty()
    }

    /// Hex SHA-256 over the pipe-joined fields.
    pub fn fingerprint(&self) -> Result<String> {
        if self.is_empty() {
            return Err(VaultError::FingerprintUnavailable(
                "device exposes no serial, vendor, product or filesystem UUID".into(),
            ));
        }
        let joined = format!(
            "{}|{}|{}|{}",
            self.serial, self.vendor, self.product, self.fs_uuid
        );
        Ok(hex::encode(Sha256::digest(joined.as_bytes())))
    }
}

/// Fingerprint of the device mounted at `device_root`.
pub fn fingerprint(device_root: &Path) -> Result<String> {
    identify(device_root)?.fingerprint()
}

/// Compare a fingerprint against a pinned value, ignoring hex case.
pub fn matches_pin(actual: &str, pinned: &str) -> bool {
    use subtle::ConstantTimeEq;
    let actual = actual.to_ascii_lowercase();
    let pinned = pinned.trim().to_ascii_lowercase();
    bool::from(actual.as_bytes().ct_eq(pinned.as_bytes()))
}

#[cfg(target_os = "linux")]
pub fn identify(device_root: &Path) -> Result<DeviceIdentity> {
    linux::identify(device_root)
}

#[cfg(not(target_os = "linux"))]
pub fn identify(_device_root: &Path) -> Result<DeviceIdentity> {
    Err(VaultError::FingerprintUnavailable(
        "device fingerprinting is not supported on this platform".into(),
    ))
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::DeviceIdentity;
    use crate::device::mounts::{parse_proc_mounts, whole_disk_name};
    use crate::errors::{Result, VaultError};

    /// How far up the sysfs tree to look for the USB device attributes.
    const MAX_SYSFS_DEPTH: usize = 8;

    pub fn identify(device_root: &Path) -> Result<DeviceIdentity> {
        let unavailable = |msg: String| VaultError::FingerprintUnavailable(msg);

        let root = fs::canonicalize(device_root)
            .map_err(|e| unavailable(format!("{}: {e}", device_root.display())))?;

        let mounts = fs::read_to_string("/proc/mounts")
            .map_err(|e| unavailable(format!("/proc/mounts: {e}")))?;

        let device_node = parse_proc_mounts(&mounts)
            .into_iter()
            .find(|(_, mount)| fs::canonicalize(mount).map_or(false, |m| m == root))
            .map(|(device, _)| PathBuf::from(device))
            .ok_or_else(|| {
                unavailable(format!("no block device is mounted at {}", root.display()))
            })?;

        let device_node = fs::canonicalize(&device_node).unwrap_or(device_node);
        let partition = device_node
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| unavailable(format!("odd device node {}", device_node.display())))?;
        let disk = whole_disk_name(&partition);

        let mut identity = DeviceIdentity {
            fs_uuid: fs_uuid_for(&device_node).unwrap_or_default(),
            ..DeviceIdentity::default()
        };

        if let Ok(start) = fs::canonicalize(format!("/sys/block/{disk}/device")) {
            for dir in start.ancestors().take(MAX_SYSFS_DEPTH) {
                fill_if_empty(&mut identity.serial, dir, "serial");
                fill_if_empty(&mut identity.vendor, dir, "idVendor");
                fill_if_empty(&mut identity.product, dir, "idProduct");
                if !identity.vendor.is_empty() && !identity.product.is_empty() {
                    break;
                }
            }
        }

        tracing::debug!(
            device = %device_node.display(),
            has_serial = !identity.serial.is_empty(),
            has_uuid = !identity.fs_uuid.is_empty(),
            "device identity read"
        );
        Ok(identity)
    }

    fn fill_if_empty(field: &mut String, dir: &Path, attr: &str) {
        if field.is_empty() {
            if let Ok(value) = fs::read_to_string(dir.join(attr)) {
                *field = value.trim().to_string();
            }
        }
    }

    fn fs_uuid_for(device_node: &Path) -> Option<String> {
        fs::read_dir("/dev/disk/by-uuid")
            .ok()?
            .flatten()
            .find(|entry| {
                fs::canonicalize(entry.path()).map_or(false, |target| target == device_node)
            })
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
    }
}
