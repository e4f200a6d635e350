//! Failed-unlock bookkeeping that outlives the process.
//!
//! Every controller over the same vault directory reads and writes one
//! owner-only record, so a new process inherits the failure count and any
//! lockout window that is still running.  The deadline is wall-clock time;
//! the remaining window is capped at the configured lockout so a clock set
//! backwards cannot stretch it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, VaultError};
use crate::vault::{create_private_dir, write_private_atomic};

/// File name of the record inside the vault directory.
pub const ATTEMPTS_FILE_NAME: &str = ".unlock_attempts";

/// Persisted failure count and lockout deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    /// Time left in the lockout window, at most `max`.
    ///
    /// `Some(Duration::ZERO)` means a window was recorded and has run out.
    pub fn lockout_remaining(&self, now: DateTime<Utc>, max: Duration) -> Option<Duration> {
        let until = self.lockout_until?;
        let left = (until - now).to_std().unwrap_or(Duration::ZERO);
        Some(left.min(max))
    }
}

/// Deadline `lockout` from `now`, saturating far in the future.
pub fn lockout_deadline(now: DateTime<Utc>, lockout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lockout)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The on-disk record for one vault directory.
#[derive(Debug, Clone)]
pub struct AttemptLedger {
    path: PathBuf,
}

impl AttemptLedger {
    pub fn new(vault_dir: &Path) -> Self {
        Self {
            path: vault_dir.join(ATTEMPTS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing record loads as no failures.  An unreadable one is logged
    /// and treated the same.
    pub fn load(&self) -> AttemptRecord {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "unreadable unlock-attempt record ignored");
                AttemptRecord::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => AttemptRecord::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "could not read unlock-attempt record");
                AttemptRecord::default()
            }
        }
    }

    /// Write `record`; an empty record removes the file.
    pub fn save(&self, record: &AttemptRecord) -> Result<()> {
        if *record == AttemptRecord::default() {
            return self.clear();
        }
        if let Some(dir) = self.path.parent() {
            create_private_dir(dir)?;
        }
        let json = serde_json::to_vec(record)
            .map_err(|e| VaultError::SerializationError(e.to_string()))?;
        write_private_atomic(&self.path, &json)
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
