//! Secure erase: overwrite a file with random data, then unlink it.

use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use rand::RngCore;

use crate::errors::VaultError;

/// Overwrite chunk size.
const CHUNK_LEN: usize = 64 * 1024;

/// Result of a secure erase.
///
/// The unlink is attempted even when an overwrite pass fails, so an
/// erase can end in three distinct states.
#[derive(Debug)]
pub enum EraseOutcome {
    /// Every pass was written and synced, and the file is gone.
    Complete,
    /// The file is gone, but at least one overwrite step failed.
    Incomplete { reason: String },
    /// The file could not be unlinked.
    Failed { error: io::Error },
}

impl EraseOutcome {
    /// Returns `true` if the file no longer exists on disk.
    pub fn is_removed(&self) -> bool {
        !matches!(self, EraseOutcome::Failed { .. })
    }

    /// Turn the outcome into the warning or error the caller surfaces.
    ///
    /// `Ok(None)` for a complete erase, `Ok(Some(EraseIncomplete))` when
    /// the file was only unlinked, and `Err` when it is still on disk.
    pub fn into_warning(self, path: &Path) -> Result<Option<VaultError>, VaultError> {
        match self {
            EraseOutcome::Complete => Ok(None),
            EraseOutcome::Incomplete { reason } => Ok(Some(VaultError::EraseIncomplete {
                path: path.to_path_buf(),
                reason,
            })),
            EraseOutcome::Failed { error } => Err(VaultError::Io(error)),
        }
    }
}

/// Overwrite `path` with CSPRNG bytes for `passes` passes, syncing after
/// each, then unlink it.
pub fn secure_erase(path: &Path, passes: u32) -> EraseOutcome {
    let overwrite = overwrite_passes(path, passes.max(1));

    match fs::remove_file(path) {
        Ok(()) => match overwrite {
            Ok(()) => EraseOutcome::Complete,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "overwrite failed before unlink");
                EraseOutcome::Incomplete {
                    reason: e.to_string(),
                }
            }
        },
        Err(error) => EraseOutcome::Failed { error },
    }
}

fn overwrite_passes(path: &Path, passes: u32) -> io::Result<()> {
    let len = fs::metadata(path)?.len();
    let mut file = OpenOptions::new().write(true).open(path)?;
    let mut rng = rand::rng();
    let mut buf = vec![0u8; CHUNK_LEN];

    for _ in 0..passes {
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(CHUNK_LEN as u64) as usize;
            rng.fill_bytes(&mut buf[..n]);
            file.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        file.flush()?;
        file.sync_all()?;
    }

    Ok(())
}
