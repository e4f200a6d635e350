use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::{Pbkdf2Params, DEFAULT_ITERATIONS, MIN_ITERATIONS};
use crate::errors::{Result, VaultError};

/// Application configuration, loaded from `config.toml`.
///
/// Every field has a sensible default so usbvault works out-of-the-box
/// without any config file at all.  The bootstrap layer decides where the
/// file lives (`Settings::default_config_path`) and passes the resulting
/// `Settings` down explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Local directory holding the vault index and `*.enc` files.
    #[serde(default = "default_vault_dir")]
    pub vault_dir: PathBuf,

    /// File name of the key blob in the USB device root.
    #[serde(default = "default_key_file_name")]
    pub key_file_name: String,

    /// File name of the encrypted index inside `vault_dir`.
    #[serde(default = "default_index_file_name")]
    pub index_file_name: String,

    /// PBKDF2 iteration count (default: 480 000, minimum 450 000).
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,

    /// Consecutive failed unlocks before lockout (default: 5).
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    /// Lockout window in seconds (default: 30).
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,

    /// Inactivity auto-lock in seconds; 0 disables (default: 300).
    #[serde(default = "default_auto_lock_secs")]
    pub auto_lock_secs: u64,

    /// Device poll interval in milliseconds (default: 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Overwrite passes for secure erase (default: 3).
    #[serde(default = "default_erase_passes")]
    pub erase_passes: u32,

    /// Securely erase the source file after adding it (default: true).
    #[serde(default = "default_wipe_source_on_add")]
    pub wipe_source_on_add: bool,

    /// Only accept the device whose fingerprint matches this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_fingerprint: Option<String>,

    /// Extra directories treated as candidate device roots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_mount_roots: Vec<PathBuf>,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_vault_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".usbvault")
}

fn default_key_file_name() -> String {
    ".vault.key".to_string()
}

fn default_index_file_name() -> String {
    ".vault_index".to_string()
}

fn default_pbkdf2_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_secs() -> u64 {
    30
}

fn default_auto_lock_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_erase_passes() -> u32 {
    3
}

fn default_wipe_source_on_add() -> bool {
    true
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_dir: default_vault_dir(),
            key_file_name: default_key_file_name(),
            index_file_name: default_index_file_name(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
            max_failed_attempts: default_max_failed_attempts(),
            lockout_secs: default_lockout_secs(),
            auto_lock_secs: default_auto_lock_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            erase_passes: default_erase_passes(),
            wipe_source_on_add: default_wipe_source_on_add(),
            pinned_fingerprint: None,
            extra_mount_roots: Vec::new(),
        }
    }
}

impl Settings {
    /// Name of the config file inside the usbvault config directory.
    const FILE_NAME: &'static str = "config.toml";

    /// `<config_dir>/usbvault/config.toml`, if the platform has a config dir.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("usbvault").join(Self::FILE_NAME))
    }

    /// Load settings from `path`.
    ///
    /// If the file does not exist, defaults are returned.  If it exists but
    /// cannot be parsed or fails validation, an error is returned.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            VaultError::ConfigError(format!("Failed to parse {}: {e}", path.display()))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would weaken the vault or break the state machine.
    pub fn validate(&self) -> Result<()> {
        if self.pbkdf2_iterations < MIN_ITERATIONS {
            return Err(VaultError::ConfigError(format!(
                "pbkdf2_iterations must be at least {MIN_ITERATIONS} (got {})",
                self.pbkdf2_iterations
            )));
        }
        if self.max_failed_attempts == 0 {
            return Err(VaultError::ConfigError(
                "max_failed_attempts must be at least 1".into(),
            ));
        }
        if self.erase_passes == 0 {
            return Err(VaultError::ConfigError(
                "erase_passes must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(VaultError::ConfigError(
                "poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.key_file_name.is_empty()
            || self.key_file_name.contains(['/', '\\'])
            || self.index_file_name.is_empty()
            || self.index_file_name.contains(['/', '\\'])
        {
            return Err(VaultError::ConfigError(
                "key_file_name and index_file_name must be plain file names".into(),
            ));
        }
        Ok(())
    }

    /// Full path of the encrypted vault index.
    pub fn index_path(&self) -> PathBuf {
        self.vault_dir.join(&self.index_file_name)
    }

    /// Path of the audit database.
    pub fn audit_db_path(&self) -> PathBuf {
        self.vault_dir.join("audit.db")
    }

    /// Convert the KDF settings into crypto-layer params.
    pub fn pbkdf2_params(&self) -> Pbkdf2Params {
        Pbkdf2Params {
            iterations: self.pbkdf2_iterations,
        }
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }

    /// `None` when auto-lock is disabled.
    pub fn auto_lock_timeout(&self) -> Option<Duration> {
        (self.auto_lock_secs > 0).then(|| Duration::from_secs(self.auto_lock_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.key_file_name, ".vault.key");
        assert_eq!(s.index_file_name, ".vault_index");
        assert_eq!(s.pbkdf2_iterations, 480_000);
        assert_eq!(s.max_failed_attempts, 5);
        assert_eq!(s.lockout_secs, 30);
        assert_eq!(s.auto_lock_secs, 300);
        assert_eq!(s.poll_interval_ms, 1_000);
        assert_eq!(s.erase_passes, 3);
        assert!(s.wipe_source_on_add);
        assert!(s.vault_dir.ends_with(".usbvault"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(settings.max_failed_attempts, 5);
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
vault_dir = "/srv/vault"
key_file_name = ".mykey"
pbkdf2_iterations = 600000
lockout_secs = 60
auto_lock_secs = 0
pinned_fingerprint = "abc123"
extra_mount_roots = ["/tmp/usb"]
"#;
        let path = tmp.path().join("config.toml");
        fs::write(&path, config).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.vault_dir, PathBuf::from("/srv/vault"));
        assert_eq!(settings.key_file_name, ".mykey");
        assert_eq!(settings.pbkdf2_iterations, 600_000);
        assert_eq!(settings.lockout_duration(), Duration::from_secs(60));
        assert_eq!(settings.auto_lock_timeout(), None);
        assert_eq!(settings.pinned_fingerprint.as_deref(), Some("abc123"));
        assert_eq!(settings.extra_mount_roots, vec![PathBuf::from("/tmp/usb")]);
        // Untouched fields keep their defaults.
        assert_eq!(settings.erase_passes, 3);
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "not valid {{toml").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn load_rejects_weak_kdf() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "pbkdf2_iterations = 1000\n").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(VaultError::ConfigError(_))
        ));
    }

    #[test]
    fn validate_rejects_path_like_file_names() {
        let s = Settings {
            key_file_name: "../evil".into(),
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn index_path_joins_vault_dir() {
        let s = Settings {
            vault_dir: PathBuf::from("/data/vault"),
            ..Settings::default()
        };
        assert_eq!(s.index_path(), PathBuf::from("/data/vault/.vault_index"));
        assert_eq!(s.audit_db_path(), PathBuf::from("/data/vault/audit.db"));
    }
}
