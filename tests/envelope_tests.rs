//! Integration tests for enrollment and the key blob on the device.

use std::fs;

use tempfile::TempDir;
use usbvault::crypto::recovery::{display_grouped, RECOVERY_CODE_LEN};
use usbvault::crypto::Pbkdf2Params;
use usbvault::envelope::{KeyEnvelope, SecretKind};
use usbvault::errors::VaultError;

const KEY_FILE: &str = ".vault.key";

fn envelope() -> KeyEnvelope {
    KeyEnvelope::new(KEY_FILE, Pbkdf2Params::default())
}

#[test]
fn password_and_recovery_code_unwrap_the_same_master_key() {
    let stick = TempDir::new().unwrap();
    let env = envelope();

    let code = env
        .create(stick.path(), b"correcthorsebattery", false)
        .unwrap();
    assert_eq!(code.len(), RECOVERY_CODE_LEN);

    let via_password = env
        .open(stick.path(), "correcthorsebattery", SecretKind::Password)
        .unwrap();
    let via_recovery = env
        .open(stick.path(), &code, SecretKind::RecoveryCode)
        .unwrap();

    assert_eq!(via_password.as_bytes(), via_recovery.as_bytes());
}

#[test]
fn recovery_code_accepts_grouped_lowercase_input() {
    let stick = TempDir::new().unwrap();
    let env = envelope();
    let code = env.create(stick.path(), b"correcthorsebattery", false).unwrap();

    let typed = format!("  {}  ", display_grouped(&code).to_lowercase());
    assert!(env
        .open(stick.path(), &typed, SecretKind::RecoveryCode)
        .is_ok());
}

#[test]
fn wrong_secrets_are_authentication_failures() {
    let stick = TempDir::new().unwrap();
    let env = envelope();
    let code = env.create(stick.path(), b"correcthorsebattery", false).unwrap();

    assert!(matches!(
        env.open(stick.path(), "correcthorsebatterx", SecretKind::Password),
        Err(VaultError::AuthenticationFailed)
    ));
    // The recovery code is not a password, and vice versa.
    assert!(matches!(
        env.open(stick.path(), &code, SecretKind::Password),
        Err(VaultError::AuthenticationFailed)
    ));
    assert!(matches!(
        env.open(stick.path(), "correcthorsebattery", SecretKind::RecoveryCode),
        Err(VaultError::AuthenticationFailed)
    ));
}

#[test]
fn damaged_blob_looks_like_a_wrong_password() {
    let stick = TempDir::new().unwrap();
    let env = envelope();
    env.create(stick.path(), b"correcthorsebattery", false).unwrap();

    let key_path = env.key_path(stick.path());
    let mut blob = fs::read(&key_path).unwrap();
    blob.truncate(blob.len() / 2);
    fs::write(&key_path, &blob).unwrap();

    assert!(matches!(
        env.open(stick.path(), "correcthorsebattery", SecretKind::Password),
        Err(VaultError::AuthenticationFailed)
    ));
}

#[test]
fn enrolling_twice_requires_overwrite_and_rotates_the_key() {
    let stick = TempDir::new().unwrap();
    let env = envelope();

    env.create(stick.path(), b"first-password", false).unwrap();
    let first = env
        .open(stick.path(), "first-password", SecretKind::Password)
        .unwrap();

    assert!(matches!(
        env.create(stick.path(), b"second-password", false),
        Err(VaultError::AlreadyEnrolled(_))
    ));

    env.create(stick.path(), b"second-password", true).unwrap();
    let second = env
        .open(stick.path(), "second-password", SecretKind::Password)
        .unwrap();

    assert_ne!(first.as_bytes(), second.as_bytes());
    assert!(env
        .open(stick.path(), "first-password", SecretKind::Password)
        .is_err());
}

#[test]
fn missing_blob_is_not_enrolled() {
    let stick = TempDir::new().unwrap();
    let env = envelope();

    assert!(!env.is_enrolled(stick.path()));
    assert!(matches!(
        env.open(stick.path(), "correcthorsebattery", SecretKind::Password),
        Err(VaultError::NotEnrolled(_))
    ));
}

#[test]
fn weak_kdf_parameters_are_rejected() {
    let stick = TempDir::new().unwrap();
    let env = KeyEnvelope::new(KEY_FILE, Pbkdf2Params { iterations: 1_000 });

    assert!(matches!(
        env.create(stick.path(), b"correcthorsebattery", false),
        Err(VaultError::KeyDerivationFailed(_))
    ));
    assert!(!stick.path().join(KEY_FILE).exists());
}
