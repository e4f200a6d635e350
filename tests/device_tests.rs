//! Integration tests for device detection feeding the session controller.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use usbvault::audit::TracingSink;
use usbvault::crypto::Pbkdf2Params;
use usbvault::device::{find_enrolled, DeviceEvent, DeviceMonitor, FixedMounts, SystemMounts};
use usbvault::envelope::{KeyEnvelope, SecretKind};
use usbvault::session::{LockPolicy, LockReason, SessionController, SessionEvent};
use usbvault::vault::VaultStore;

const KEY_FILE: &str = ".vault.key";
const WAIT: Duration = Duration::from_secs(5);

#[test]
fn extra_mount_roots_are_scanned_one_level_deep() {
    let mounts = TempDir::new().unwrap();
    let stick = mounts.path().join("KEYSTICK");
    fs::create_dir(&stick).unwrap();
    fs::create_dir(mounts.path().join("OTHER")).unwrap();

    let source = SystemMounts::new(vec![mounts.path().to_path_buf()]);
    assert_eq!(find_enrolled(&source, KEY_FILE), None);

    fs::write(stick.join(KEY_FILE), b"blob").unwrap();
    assert_eq!(find_enrolled(&source, KEY_FILE), Some(stick));
}

#[test]
fn switching_sticks_reports_removal_then_insertion() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    fs::write(a.path().join(KEY_FILE), b"blob").unwrap();

    let monitor = DeviceMonitor::new(
        FixedMounts(vec![a.path().to_path_buf(), b.path().to_path_buf()]),
        KEY_FILE,
        Duration::from_millis(10),
    );
    assert_eq!(
        monitor.poll_once(),
        vec![DeviceEvent::Connected(a.path().to_path_buf())]
    );

    fs::remove_file(a.path().join(KEY_FILE)).unwrap();
    fs::write(b.path().join(KEY_FILE), b"blob").unwrap();

    assert_eq!(
        monitor.poll_once(),
        vec![
            DeviceEvent::Disconnected,
            DeviceEvent::Connected(b.path().to_path_buf())
        ]
    );
}

#[test]
fn pulling_the_key_locks_an_unlocked_session() {
    let vault = TempDir::new().unwrap();
    let stick = TempDir::new().unwrap();

    let controller = Arc::new(SessionController::new(
        LockPolicy::default(),
        KeyEnvelope::new(KEY_FILE, Pbkdf2Params::default()),
        VaultStore::new(vault.path(), ".vault_index", 1),
        Arc::new(TracingSink),
    ));
    controller
        .setup_enroll(stick.path(), "correcthorsebattery", false)
        .unwrap();
    let events = controller.subscribe();

    let mut monitor = DeviceMonitor::new(
        FixedMounts(vec![stick.path().to_path_buf()]),
        KEY_FILE,
        Duration::from_millis(20),
    );
    let mut reactor = controller
        .spawn_reactor(monitor.subscribe(), Duration::from_millis(20))
        .unwrap();
    monitor.start().unwrap();

    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        SessionEvent::DeviceConnected(stick.path().to_path_buf())
    );
    controller
        .attempt_unlock("correcthorsebattery", SecretKind::Password)
        .unwrap();

    // Simulate the stick going away by hiding its key blob.
    let key_path = stick.path().join(KEY_FILE);
    fs::rename(&key_path, stick.path().join("hidden")).unwrap();

    let locked = loop {
        match events.recv_timeout(WAIT).unwrap() {
            SessionEvent::Locked(reason) => break reason,
            _ => continue,
        }
    };
    assert_eq!(locked, LockReason::DeviceRemoved);
    assert!(!controller.is_unlocked());

    monitor.stop();
    reactor.stop();
}
