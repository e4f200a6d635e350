//! Security events and where they are recorded.
//!
//! Components never log secrets themselves; they describe what happened
//! as a `SecurityEvent` and hand it to an injected `SecurityEventSink`.
//! No event carries a password, recovery code, key, or file content.

#[cfg(feature = "audit-log")]
mod db;

use std::fmt;
use std::path::PathBuf;

use crate::session::LockReason;

#[cfg(feature = "audit-log")]
pub use db::{AuditEntry, AuditLog};

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
    Failure,
}

impl EventLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Failure => "failure",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something security-relevant that happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    AuthSuccess { recovery: bool },
    AuthFailure { attempt: u32, remaining: u32 },
    Lockout { duration_secs: u64 },
    LockoutExpired,
    UsbConnected { path: PathBuf },
    UsbRemoved,
    VaultLocked { reason: LockReason },
    FileAdded { vault_id: String, size_bytes: u64 },
    FileExtracted { vault_id: String },
    FileDeleted { vault_id: String },
    EraseIncomplete { path: PathBuf },
    IntegrityViolation { vault_id: String },
    IndexQuarantined { moved_to: PathBuf },
    Enrolled { device: PathBuf },
}

impl SecurityEvent {
    /// Stable event name stored in the audit log.
    pub fn name(&self) -> &'static str {
        match self {
            SecurityEvent::AuthSuccess { .. } => "AUTH_SUCCESS",
            SecurityEvent::AuthFailure { .. } => "AUTH_FAILURE",
            SecurityEvent::Lockout { .. } => "AUTH_LOCKOUT",
            SecurityEvent::LockoutExpired => "AUTH_LOCKOUT_EXPIRED",
            SecurityEvent::UsbConnected { .. } => "USB_CONNECTED",
            SecurityEvent::UsbRemoved => "USB_REMOVED",
            SecurityEvent::VaultLocked { .. } => "VAULT_LOCKED",
            SecurityEvent::FileAdded { .. } => "FILE_ADDED",
            SecurityEvent::FileExtracted { .. } => "FILE_EXTRACTED",
            SecurityEvent::FileDeleted { .. } => "FILE_DELETED",
            SecurityEvent::EraseIncomplete { .. } => "ERASE_INCOMPLETE",
            SecurityEvent::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
            SecurityEvent::IndexQuarantined { .. } => "INDEX_QUARANTINED",
            SecurityEvent::Enrolled { .. } => "ENROLLED",
        }
    }

    pub fn level(&self) -> EventLevel {
        match self {
            SecurityEvent::AuthFailure { .. }
            | SecurityEvent::Lockout { .. }
            | SecurityEvent::IntegrityViolation { .. }
            | SecurityEvent::IndexQuarantined { .. } => EventLevel::Failure,
            SecurityEvent::UsbRemoved | SecurityEvent::EraseIncomplete { .. } => {
                EventLevel::Warning
            }
            _ => EventLevel::Info,
        }
    }

    /// Short `key=value` details, if the event has any.
    pub fn details(&self) -> Option<String> {
        match self {
            SecurityEvent::AuthSuccess { recovery } => {
                Some(format!("method={}", if *recovery { "recovery" } else { "password" }))
            }
            SecurityEvent::AuthFailure { attempt, remaining } => {
                Some(format!("attempt={attempt} remaining={remaining}"))
            }
            SecurityEvent::Lockout { duration_secs } => Some(format!("duration={duration_secs}s")),
            SecurityEvent::UsbConnected { path } => Some(format!("path={}", path.display())),
            SecurityEvent::VaultLocked { reason } => Some(format!("reason={reason}")),
            SecurityEvent::FileAdded {
                vault_id,
                size_bytes,
            } => Some(format!("id={vault_id} size={size_bytes}")),
            SecurityEvent::FileExtracted { vault_id }
            | SecurityEvent::FileDeleted { vault_id }
            | SecurityEvent::IntegrityViolation { vault_id } => Some(format!("id={vault_id}")),
            SecurityEvent::EraseIncomplete { path } => Some(format!("path={}", path.display())),
            SecurityEvent::IndexQuarantined { moved_to } => {
                Some(format!("moved_to={}", moved_to.display()))
            }
            SecurityEvent::Enrolled { device } => Some(format!("device={}", device.display())),
            SecurityEvent::LockoutExpired | SecurityEvent::UsbRemoved => None,
        }
    }
}

/// Receives security events.  Recording must never fail the caller.
pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: &SecurityEvent);
}

/// Forwards events to `tracing` at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SecurityEventSink for TracingSink {
    fn record(&self, event: &SecurityEvent) {
        let name = event.name();
        let details = event.details().unwrap_or_default();
        match event.level() {
            EventLevel::Info => tracing::info!(target: "usbvault::security", event = name, %details),
            EventLevel::Warning => {
                tracing::warn!(target: "usbvault::security", event = name, %details)
            }
            EventLevel::Failure => {
                tracing::error!(target: "usbvault::security", event = name, %details)
            }
        }
    }
}
