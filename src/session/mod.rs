//! Session controller: the lock/unlock state machine.
//!
//! ```text
//!            attempt_unlock (ok)
//!   Locked ───────────────────────▶ Unlocked
//!     ▲  │                             │
//!     │  │ N failures                  │ request_lock / inactivity /
//!     │  ▼                             │ device removed
//!   Locked (lockout window) ◀──────────┘
//! ```
//!
//! The controller owns the device-path cell (written only by
//! `handle_device_event`), the failure counter, and the storage engine.
//! Key derivation runs outside the state lock; unlock attempts are
//! serialized by their own gate so two attempts cannot race the counter.
//! Timers are evaluated lazily: by `tick()` from the reactor and at the
//! start of every attempt or vault operation.
//!
//! The failure count and lockout deadline are mirrored to the vault
//! directory (`attempts`), so a fresh controller in another process starts
//! from the same count and honours a running lockout.

pub mod attempts;
mod reactor;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use zeroize::Zeroizing;

use crate::audit::{SecurityEvent, SecurityEventSink};
use crate::config::Settings;
use crate::crypto::VaultCipher;
use crate::device::fingerprint::{self, matches_pin};
use crate::device::DeviceEvent;
use crate::envelope::{KeyEnvelope, SecretKind};
use crate::errors::{Result, VaultError};
use crate::vault::{AddOutcome, DeleteOutcome, VaultEntry, VaultStore};

pub use attempts::{AttemptLedger, AttemptRecord};
pub use reactor::ReactorHandle;

/// Minimum password length accepted at enrollment.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Why the vault was locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Manual,
    Timeout,
    DeviceRemoved,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockReason::Manual => "manual",
            LockReason::Timeout => "timeout",
            LockReason::DeviceRemoved => "usb-removed",
        })
    }
}

/// Result of an unlock attempt, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success { recovery: bool },
    Failed { remaining_attempts: u32 },
    LockedOut { remaining_secs: u64 },
}

/// Notifications for the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    DeviceConnected(PathBuf),
    DeviceDisconnected,
    AuthResult(AuthOutcome),
    Locked(LockReason),
    LockoutExpired,
}

/// Attempt and timer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_failed_attempts: u32,
    pub lockout: Duration,
    /// `None` disables auto-lock.
    pub auto_lock: Option<Duration>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout: Duration::from_secs(30),
            auto_lock: Some(Duration::from_secs(300)),
        }
    }
}

impl LockPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_failed_attempts: settings.max_failed_attempts.max(1),
            lockout: settings.lockout_duration(),
            auto_lock: settings.auto_lock_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Locked {
        failed_attempts: u32,
        lockout_until: Option<Instant>,
    },
    Unlocked {
        last_activity: Instant,
    },
}

impl SessionState {
    fn fresh_locked() -> Self {
        SessionState::Locked {
            failed_attempts: 0,
            lockout_until: None,
        }
    }
}

/// What a successful unlock produced.
#[derive(Debug)]
pub struct UnlockReport {
    pub recovery: bool,
    pub entry_count: usize,
    /// `StorageCorrupt` when the index had to be quarantined.
    pub warning: Option<VaultError>,
}

/// Snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub unlocked: bool,
    pub device: Option<PathBuf>,
    pub failed_attempts: u32,
    pub remaining_attempts: u32,
    pub lockout_remaining: Option<Duration>,
    pub idle_remaining: Option<Duration>,
    pub entry_count: Option<usize>,
}

type Fingerprinter = fn(&Path) -> Result<String>;

/// Orchestrates unlock, lock, and every vault operation.
pub struct SessionController {
    policy: LockPolicy,
    pinned_fingerprint: Option<String>,
    wipe_source_on_add: bool,
    envelope: KeyEnvelope,
    store: VaultStore,
    attempts: AttemptLedger,
    sink: Arc<dyn SecurityEventSink>,
    state: Mutex<SessionState>,
    device: RwLock<Option<PathBuf>>,
    unlock_gate: Mutex<()>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
    fingerprinter: Fingerprinter,
}

impl SessionController {
    pub fn new(
        policy: LockPolicy,
        envelope: KeyEnvelope,
        store: VaultStore,
        sink: Arc<dyn SecurityEventSink>,
    ) -> Self {
        let controller = Self {
            policy,
            pinned_fingerprint: None,
            wipe_source_on_add: true,
            envelope,
            attempts: AttemptLedger::new(store.vault_dir()),
            store,
            sink,
            state: Mutex::new(SessionState::fresh_locked()),
            device: RwLock::new(None),
            unlock_gate: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            fingerprinter: fingerprint::fingerprint,
        };
        {
            let mut state = controller.lock_state();
            controller.adopt_persisted(&mut state, Instant::now());
        }
        controller
    }

    pub fn from_settings(settings: &Settings, sink: Arc<dyn SecurityEventSink>) -> Self {
        Self::new(
            LockPolicy::from_settings(settings),
            KeyEnvelope::from_settings(settings),
            VaultStore::from_settings(settings),
            sink,
        )
        .with_pinned_fingerprint(settings.pinned_fingerprint.clone())
        .with_wipe_source_on_add(settings.wipe_source_on_add)
    }

    /// Only unlock on the device with this fingerprint.
    pub fn with_pinned_fingerprint(mut self, pin: Option<String>) -> Self {
        self.pinned_fingerprint = pin.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_wipe_source_on_add(mut self, wipe: bool) -> Self {
        self.wipe_source_on_add = wipe;
        self
    }

    /// Replace the device fingerprint function.
    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    // ------------------------------------------------------------------
    // Subscriptions and internals
    // ------------------------------------------------------------------

    /// Receive every future `SessionEvent`.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn publish(&self, event: SessionEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remaining_attempts(&self, failed: u32) -> u32 {
        self.policy.max_failed_attempts.saturating_sub(failed)
    }

    /// Fold in failures recorded on disk by any controller over this vault.
    fn adopt_persisted(&self, state: &mut SessionState, now: Instant) {
        let SessionState::Locked {
            failed_attempts,
            lockout_until,
        } = state
        else {
            return;
        };

        let record = self.attempts.load();
        *failed_attempts = (*failed_attempts).max(record.failed_attempts);
        if lockout_until.is_none() {
            if let Some(left) = record.lockout_remaining(Utc::now(), self.policy.lockout) {
                *lockout_until = Some(now + left);
            }
        }
    }

    fn persist_attempts(&self, record: &AttemptRecord) {
        if let Err(e) = self.attempts.save(record) {
            tracing::warn!(path = %self.attempts.path().display(), error = %e, "could not persist unlock attempts");
        }
    }

    /// Apply any timer that has run out.  Returns the event to publish.
    fn expire_timers(&self, state: &mut SessionState, now: Instant) -> Option<SessionEvent> {
        match *state {
            SessionState::Locked {
                lockout_until: Some(until),
                ..
            } if now >= until => {
                *state = SessionState::fresh_locked();
                self.persist_attempts(&AttemptRecord::default());
                self.sink.record(&SecurityEvent::LockoutExpired);
                Some(SessionEvent::LockoutExpired)
            }
            SessionState::Unlocked { last_activity } => {
                let idle = now.saturating_duration_since(last_activity);
                if self.policy.auto_lock.is_some_and(|limit| idle >= limit) {
                    Some(self.lock_in_place(state, LockReason::Timeout))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn lock_in_place(&self, state: &mut SessionState, reason: LockReason) -> SessionEvent {
        self.store.close();
        *state = SessionState::fresh_locked();
        self.sink.record(&SecurityEvent::VaultLocked { reason });
        tracing::info!(%reason, "vault locked");
        SessionEvent::Locked(reason)
    }

    // ------------------------------------------------------------------
    // Device events and timers
    // ------------------------------------------------------------------

    /// Root of the device as last reported by the monitor.
    pub fn current_device(&self) -> Option<PathBuf> {
        self.device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// React to a presence transition.  Removal while unlocked locks at once.
    pub fn handle_device_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected(path) => {
                *self.device.write().unwrap_or_else(PoisonError::into_inner) = Some(path.clone());
                self.sink
                    .record(&SecurityEvent::UsbConnected { path: path.clone() });
                self.publish(SessionEvent::DeviceConnected(path));
            }
            DeviceEvent::Disconnected => {
                *self.device.write().unwrap_or_else(PoisonError::into_inner) = None;
                self.sink.record(&SecurityEvent::UsbRemoved);
                self.publish(SessionEvent::DeviceDisconnected);

                let locked = {
                    let mut state = self.lock_state();
                    match *state {
                        SessionState::Unlocked { .. } => {
                            Some(self.lock_in_place(&mut state, LockReason::DeviceRemoved))
                        }
                        SessionState::Locked { .. } => None,
                    }
                };
                if let Some(event) = locked {
                    self.publish(event);
                }
            }
        }
    }

    /// Evaluate the lockout and inactivity timers.
    pub fn tick(&self) {
        let event = {
            let mut state = self.lock_state();
            self.expire_timers(&mut state, Instant::now())
        };
        if let Some(event) = event {
            self.publish(event);
        }
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    /// Try to unlock with a password or recovery code.
    ///
    /// Inside a lockout window every attempt is rejected with `LockedOut`
    /// without touching the key blob, including a window opened by another
    /// process.  A wrong secret counts toward the lockout; a missing device,
    /// missing blob or pin mismatch does not.  An already unlocked session
    /// is refused so a secret is never reported as accepted unverified.
    pub fn attempt_unlock(&self, secret: &str, kind: SecretKind) -> Result<UnlockReport> {
        let _gate = self
            .unlock_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let (expired, gate_result) = {
            let mut state = self.lock_state();
            self.adopt_persisted(&mut state, now);
            let expired = self.expire_timers(&mut state, now);
            let gate_result = match *state {
                SessionState::Unlocked { .. } => Some(Ok(())),
                SessionState::Locked {
                    lockout_until: Some(until),
                    ..
                } => {
                    let remaining = until.saturating_duration_since(now);
                    Some(Err(remaining))
                }
                SessionState::Locked { .. } => None,
            };
            (expired, gate_result)
        };
        if let Some(event) = expired {
            self.publish(event);
        }
        match gate_result {
            Some(Ok(())) => {
                return Err(VaultError::CommandFailed("vault is already unlocked".into()))
            }
            Some(Err(remaining)) => {
                let remaining_secs = ceil_secs(remaining);
                self.publish(SessionEvent::AuthResult(AuthOutcome::LockedOut {
                    remaining_secs,
                }));
                return Err(VaultError::LockedOut { remaining_secs });
            }
            None => {}
        }

        let device = self.current_device().ok_or(VaultError::DeviceAbsent)?;
        self.check_pin(&device)?;

        // Key derivation runs outside the state lock.
        let master_key = match self.envelope.open(&device, secret, kind) {
            Ok(key) => key,
            Err(VaultError::AuthenticationFailed) => return Err(self.record_failure()),
            Err(e) => return Err(e),
        };

        if self.current_device().as_deref() != Some(device.as_path()) {
            return Err(VaultError::DeviceAbsent);
        }

        let cipher = VaultCipher::from_master_key(&master_key)?;
        drop(master_key);

        let open_report = self.store.open(cipher)?;

        {
            let mut state = self.lock_state();
            // A removal that landed while the store was opening wins.
            if self.current_device().as_deref() != Some(device.as_path()) {
                self.store.close();
                return Err(VaultError::DeviceAbsent);
            }
            *state = SessionState::Unlocked {
                last_activity: Instant::now(),
            };
            self.persist_attempts(&AttemptRecord::default());
        }

        self.sink.record(&SecurityEvent::AuthSuccess {
            recovery: kind.is_recovery(),
        });
        if let Some(moved_to) = &open_report.quarantined_index {
            self.sink.record(&SecurityEvent::IndexQuarantined {
                moved_to: moved_to.clone(),
            });
        }
        self.publish(SessionEvent::AuthResult(AuthOutcome::Success {
            recovery: kind.is_recovery(),
        }));

        Ok(UnlockReport {
            recovery: kind.is_recovery(),
            entry_count: open_report.entry_count,
            warning: open_report.warning(),
        })
    }

    fn check_pin(&self, device: &Path) -> Result<()> {
        let Some(pin) = &self.pinned_fingerprint else {
            return Ok(());
        };
        let actual = (self.fingerprinter)(device)?;
        if matches_pin(&actual, pin) {
            Ok(())
        } else {
            tracing::warn!(device = %device.display(), "device fingerprint does not match pin");
            Err(VaultError::DeviceMismatch)
        }
    }

    fn record_failure(&self) -> VaultError {
        let (attempt, remaining, lockout) = {
            let mut state = self.lock_state();
            self.adopt_persisted(&mut state, Instant::now());
            let failed = match *state {
                SessionState::Locked {
                    failed_attempts, ..
                } => failed_attempts + 1,
                SessionState::Unlocked { .. } => 1,
            };
            let lockout = failed >= self.policy.max_failed_attempts;
            *state = SessionState::Locked {
                failed_attempts: failed,
                lockout_until: lockout.then(|| Instant::now() + self.policy.lockout),
            };
            self.persist_attempts(&AttemptRecord {
                failed_attempts: failed,
                lockout_until: lockout
                    .then(|| attempts::lockout_deadline(Utc::now(), self.policy.lockout)),
            });
            (failed, self.remaining_attempts(failed), lockout)
        };

        self.sink.record(&SecurityEvent::AuthFailure { attempt, remaining });
        self.publish(SessionEvent::AuthResult(AuthOutcome::Failed {
            remaining_attempts: remaining,
        }));

        if lockout {
            let duration_secs = self.policy.lockout.as_secs();
            self.sink.record(&SecurityEvent::Lockout { duration_secs });
            self.publish(SessionEvent::AuthResult(AuthOutcome::LockedOut {
                remaining_secs: ceil_secs(self.policy.lockout),
            }));
            tracing::warn!(attempt, "too many failed unlocks; locked out");
        }

        VaultError::AuthenticationFailed
    }

    /// Lock now.  Returns `false` if the vault was already locked.
    pub fn request_lock(&self) -> bool {
        let event = {
            let mut state = self.lock_state();
            match *state {
                SessionState::Unlocked { .. } => {
                    Some(self.lock_in_place(&mut state, LockReason::Manual))
                }
                SessionState::Locked { .. } => None,
            }
        };
        match event {
            Some(event) => {
                self.publish(event);
                true
            }
            None => false,
        }
    }

    /// Enroll `device_path` and return the recovery code (shown once).
    ///
    /// Refused while unlocked; re-enrolling replaces the master key.
    pub fn setup_enroll(
        &self,
        device_path: &Path,
        password: &str,
        overwrite: bool,
    ) -> Result<Zeroizing<String>> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(VaultError::CommandFailed(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if self.is_unlocked() {
            return Err(VaultError::CommandFailed(
                "lock the vault before enrolling a device".into(),
            ));
        }

        let code = self
            .envelope
            .create(device_path, password.as_bytes(), overwrite)?;
        self.sink.record(&SecurityEvent::Enrolled {
            device: device_path.to_path_buf(),
        });
        Ok(code)
    }

    // ------------------------------------------------------------------
    // Vault operations
    // ------------------------------------------------------------------

    /// Check the session is unlocked and reset the inactivity timer.
    fn touch(&self) -> Result<()> {
        let now = Instant::now();
        let (expired, result) = {
            let mut state = self.lock_state();
            let expired = self.expire_timers(&mut state, now);
            let result = match &mut *state {
                SessionState::Unlocked { last_activity } => {
                    *last_activity = now;
                    Ok(())
                }
                SessionState::Locked { .. } => Err(VaultError::VaultLocked),
            };
            (expired, result)
        };
        if let Some(event) = expired {
            self.publish(event);
        }
        result
    }

    fn vault_op<T>(&self, op: impl FnOnce(&VaultStore) -> Result<T>) -> Result<T> {
        self.touch()?;
        let result = op(&self.store);
        if result.is_ok() {
            let _ = self.touch();
        }
        result
    }

    pub fn list_entries(&self) -> Result<Vec<VaultEntry>> {
        self.vault_op(|store| store.list())
    }

    /// Add a file, erasing the source according to settings.
    pub fn add_file(&self, path: &Path) -> Result<AddOutcome> {
        self.add_file_with(path, self.wipe_source_on_add)
    }

    pub fn add_file_with(&self, path: &Path, wipe_source: bool) -> Result<AddOutcome> {
        let outcome = self.vault_op(|store| store.add_file(path, wipe_source))?;
        self.sink.record(&SecurityEvent::FileAdded {
            vault_id: outcome.entry.vault_id.clone(),
            size_bytes: outcome.entry.size_bytes,
        });
        if let Some(VaultError::EraseIncomplete { path, .. }) = &outcome.warning {
            self.sink
                .record(&SecurityEvent::EraseIncomplete { path: path.clone() });
        }
        Ok(outcome)
    }

    pub fn extract_file(&self, vault_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        match self.vault_op(|store| store.extract(vault_id, dest_dir)) {
            Ok(path) => {
                self.sink.record(&SecurityEvent::FileExtracted {
                    vault_id: vault_id.to_string(),
                });
                Ok(path)
            }
            Err(e) => {
                if e.is_tamper_signal() {
                    self.sink.record(&SecurityEvent::IntegrityViolation {
                        vault_id: vault_id.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    pub fn delete_file(&self, vault_id: &str) -> Result<DeleteOutcome> {
        let outcome = self.vault_op(|store| store.delete(vault_id))?;
        self.sink.record(&SecurityEvent::FileDeleted {
            vault_id: vault_id.to_string(),
        });
        if let Some(VaultError::EraseIncomplete { path, .. }) = &outcome.warning {
            self.sink
                .record(&SecurityEvent::EraseIncomplete { path: path.clone() });
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn is_unlocked(&self) -> bool {
        matches!(*self.lock_state(), SessionState::Unlocked { .. })
    }

    pub fn failed_attempts(&self) -> u32 {
        match *self.lock_state() {
            SessionState::Locked {
                failed_attempts, ..
            } => failed_attempts,
            SessionState::Unlocked { .. } => 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        let now = Instant::now();
        let state = *self.lock_state();
        let (unlocked, failed, lockout_remaining, idle_remaining) = match state {
            SessionState::Locked {
                failed_attempts,
                lockout_until,
            } => (
                false,
                failed_attempts,
                lockout_until
                    .map(|u| u.saturating_duration_since(now))
                    .filter(|d| !d.is_zero()),
                None,
            ),
            SessionState::Unlocked { last_activity } => (
                true,
                0,
                None,
                self.policy
                    .auto_lock
                    .map(|limit| limit.saturating_sub(now.saturating_duration_since(last_activity))),
            ),
        };

        SessionStatus {
            unlocked,
            device: self.current_device(),
            failed_attempts: failed,
            remaining_attempts: self.remaining_attempts(failed),
            lockout_remaining,
            idle_remaining,
            entry_count: self.store.entry_count(),
        }
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    pub fn envelope(&self) -> &KeyEnvelope {
        &self.envelope
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.store.close();
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
