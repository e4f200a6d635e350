//! Device monitor: presence of the enrolled USB key.
//!
//! A background thread scans the candidate mounts every poll interval and
//! looks for the key blob.  The last seen root is kept in a shared cell so
//! `current_path()` never waits on a scan, and every transition is pushed
//! exactly once to each subscriber.

pub mod fingerprint;
pub mod mounts;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::config::Settings;
use crate::errors::{Result, VaultError};

pub use fingerprint::{fingerprint, DeviceIdentity};
pub use mounts::{find_enrolled, FixedMounts, MountSource, SystemMounts};

/// A presence transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(PathBuf),
    Disconnected,
}

/// Events implied by moving from `prev` to `found`.
///
/// A different root replacing the current one is a removal followed by an
/// insertion.
pub fn detect_transition(prev: Option<&Path>, found: Option<&Path>) -> Vec<DeviceEvent> {
    match (prev, found) {
        (None, None) => Vec::new(),
        (None, Some(new)) => vec![DeviceEvent::Connected(new.to_path_buf())],
        (Some(_), None) => vec![DeviceEvent::Disconnected],
        (Some(old), Some(new)) if old == new => Vec::new(),
        (Some(_), Some(new)) => vec![
            DeviceEvent::Disconnected,
            DeviceEvent::Connected(new.to_path_buf()),
        ],
    }
}

struct Shared {
    source: Box<dyn MountSource>,
    key_file_name: String,
    current: RwLock<Option<PathBuf>>,
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
}

impl Shared {
    fn poll(&self) -> Vec<DeviceEvent> {
        // Scan outside the lock so presence queries never wait on I/O.
        let found = find_enrolled(self.source.as_ref(), &self.key_file_name);

        let events = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let events = detect_transition(current.as_deref(), found.as_deref());
            if !events.is_empty() {
                *current = found;
            }
            events
        };

        if !events.is_empty() {
            let mut subs = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for event in &events {
                tracing::info!(?event, "device transition");
                subs.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
        events
    }
}

/// Polls for the enrolled device on a background thread.
pub struct DeviceMonitor {
    shared: Arc<Shared>,
    interval: Duration,
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl DeviceMonitor {
    pub fn new(
        source: impl MountSource + 'static,
        key_file_name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source: Box::new(source),
                key_file_name: key_file_name.into(),
                current: RwLock::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
            interval,
            worker: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            SystemMounts::new(settings.extra_mount_roots.clone()),
            settings.key_file_name.clone(),
            settings.poll_interval(),
        )
    }

    /// Receive every future transition.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = unbounded();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Root of the enrolled device as of the last poll.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.shared
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one scan on the calling thread and publish any transitions.
    pub fn poll_once(&self) -> Vec<DeviceEvent> {
        self.shared.poll()
    }

    /// Start the background poll thread.  Starting twice is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = unbounded::<()>();
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("usb-monitor".into())
            .spawn(move || loop {
                shared.poll();
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| VaultError::CommandFailed(format!("cannot start device monitor: {e}")))?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "device monitor started");
        self.worker = Some((stop_tx, handle));
        Ok(())
    }

    /// Stop the poll thread and wait for it to exit.
    pub fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                tracing::warn!("device monitor thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn transitions() {
        let a = Path::new("/media/a");
        let b = Path::new("/media/b");

        assert!(detect_transition(None, None).is_empty());
        assert!(detect_transition(Some(a), Some(a)).is_empty());
        assert_eq!(
            detect_transition(None, Some(a)),
            vec![DeviceEvent::Connected(a.to_path_buf())]
        );
        assert_eq!(
            detect_transition(Some(a), None),
            vec![DeviceEvent::Disconnected]
        );
        assert_eq!(
            detect_transition(Some(a), Some(b)),
            vec![
                DeviceEvent::Disconnected,
                DeviceEvent::Connected(b.to_path_buf())
            ]
        );
    }

    #[test]
    fn poll_reports_each_transition_once() {
        let stick = TempDir::new().unwrap();
        let monitor = DeviceMonitor::new(
            FixedMounts(vec![stick.path().to_path_buf()]),
            ".vault.key",
            Duration::from_millis(10),
        );
        let rx = monitor.subscribe();

        assert!(monitor.poll_once().is_empty());
        assert_eq!(monitor.current_path(), None);

        fs::write(stick.path().join(".vault.key"), b"blob").unwrap();
        monitor.poll_once();
        monitor.poll_once();
        assert_eq!(monitor.current_path(), Some(stick.path().to_path_buf()));

        fs::remove_file(stick.path().join(".vault.key")).unwrap();
        monitor.poll_once();
        assert_eq!(monitor.current_path(), None);

        let events: Vec<DeviceEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                DeviceEvent::Connected(stick.path().to_path_buf()),
                DeviceEvent::Disconnected
            ]
        );
    }

    #[test]
    fn background_thread_delivers_events() {
        let stick = TempDir::new().unwrap();
        fs::write(stick.path().join(".vault.key"), b"blob").unwrap();

        let mut monitor = DeviceMonitor::new(
            FixedMounts(vec![stick.path().to_path_buf()]),
            ".vault.key",
            Duration::from_millis(10),
        );
        let rx = monitor.subscribe();
        monitor.start().unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, DeviceEvent::Connected(stick.path().to_path_buf()));

        monitor.stop();
        assert!(!monitor.is_running());
    }
}
