//! Removable-mount enumeration.
//!
//! Linux reads `/proc/mounts` and keeps mounts whose backing block device
//! reports `removable == 1` in sysfs, then adds whatever sits under the
//! usual automount directories.  Windows asks for logical drives of type
//! `DRIVE_REMOVABLE`.  Everything else falls back to a directory scan.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A source of candidate device roots.
pub trait MountSource: Send + Sync {
    /// Directories that might be the root of a removable device.
    fn candidate_roots(&self) -> Vec<PathBuf>;
}

/// The host's removable mounts, plus any configured extra roots.
#[derive(Debug, Clone, Default)]
pub struct SystemMounts {
    extra_roots: Vec<PathBuf>,
}

impl SystemMounts {
    pub fn new(extra_roots: Vec<PathBuf>) -> Self {
        Self { extra_roots }
    }
}

impl MountSource for SystemMounts {
    fn candidate_roots(&self) -> Vec<PathBuf> {
        let mut roots = platform_candidates();
        for extra in &self.extra_roots {
            if extra.is_dir() {
                roots.push(extra.clone());
                push_subdirs(extra, &mut roots);
            }
        }
        dedup(roots)
    }
}

/// A fixed list of roots; useful when the device path is already known.
#[derive(Debug, Clone, Default)]
pub struct FixedMounts(pub Vec<PathBuf>);

impl MountSource for FixedMounts {
    fn candidate_roots(&self) -> Vec<PathBuf> {
        self.0.iter().filter(|p| p.is_dir()).cloned().collect()
    }
}

/// First candidate root that carries `key_file_name`.
pub fn find_enrolled(source: &dyn MountSource, key_file_name: &str) -> Option<PathBuf> {
    source
        .candidate_roots()
        .into_iter()
        .find(|root| root.join(key_file_name).is_file())
}

fn dedup(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    roots
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

fn push_subdirs(base: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(base) else {
        return;
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    out.extend(dirs);
}

// ---------------------------------------------------------------------------
// Linux
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn platform_candidates() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(mounts) = fs::read_to_string("/proc/mounts") {
        for (device, mount) in parse_proc_mounts(&mounts) {
            if is_removable_block_device(&device) {
                roots.push(mount);
            }
        }
    }

    // /media/<user>/<label> and /run/media/<user>/<label> on desktop distros.
    for base in ["/media", "/run/media"] {
        let mut level1 = Vec::new();
        push_subdirs(Path::new(base), &mut level1);
        for dir in &level1 {
            push_subdirs(dir, &mut roots);
        }
        roots.extend(level1);
    }
    push_subdirs(Path::new("/mnt"), &mut roots);

    roots
}

#[cfg(target_os = "linux")]
fn is_removable_block_device(device: &str) -> bool {
    let Some(name) = device.strip_prefix("/dev/") else {
        return false;
    };
    let name = name.rsplit('/').next().unwrap_or(name);
    let disk = whole_disk_name(name);
    fs::read_to_string(format!("/sys/block/{disk}/removable"))
        .map(|s| s.trim() == "1")
        .unwrap_or(false)
}

/// Parse `/proc/mounts` into `(device, mount_point)` pairs.
///
/// The kernel escapes whitespace in mount points as octal (`\040`).
pub fn parse_proc_mounts(contents: &str) -> Vec<(String, PathBuf)> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount = fields.next()?;
            Some((device.to_string(), PathBuf::from(unescape_mount_field(mount))))
        })
        .collect()
}

fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(octal, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Strip the partition suffix from a block device name.
///
/// `sdb1 -> sdb`, `nvme0n1p2 -> nvme0n1`, `mmcblk0p1 -> mmcblk0`.  Names
/// that already name a whole disk in `/sys/block` are returned unchanged.
pub fn whole_disk_name(name: &str) -> String {
    if Path::new("/sys/block").join(name).exists() {
        return name.to_string();
    }
    strip_partition_suffix(name).to_string()
}

pub fn strip_partition_suffix(name: &str) -> &str {
    let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.len() == name.len() {
        return name;
    }
    match trimmed.strip_suffix('p') {
        Some(disk) if disk.ends_with(|c: char| c.is_ascii_digit()) => disk,
        _ => trimmed,
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

#[cfg(windows)]
fn platform_candidates() -> Vec<PathBuf> {
    use windows_sys::Win32::Storage::FileSystem::{GetDriveTypeW, GetLogicalDrives};

    const DRIVE_REMOVABLE: u32 = 2;

    // SAFETY: no arguments; returns a bitmask of present drive letters.
    let mask = unsafe { GetLogicalDrives() };

    (0u8..26)
        .filter(|bit| mask & (1 << bit) != 0)
        .filter_map(|bit| {
            let root = format!("{}:\\", char::from(b'A' + bit));
            let wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
            // SAFETY: `wide` is a NUL-terminated UTF-16 string that outlives the call.
            let kind = unsafe { GetDriveTypeW(wide.as_ptr()) };
            (kind == DRIVE_REMOVABLE).then(|| PathBuf::from(root))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Everything else
// ---------------------------------------------------------------------------

#[cfg(not(any(target_os = "linux", windows)))]
fn platform_candidates() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for base in ["/Volumes", "/media", "/mnt"] {
        push_subdirs(Path::new(base), &mut roots);
    }
    roots
}
