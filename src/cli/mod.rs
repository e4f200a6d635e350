//! Command-line front end: argument parsing, prompts, and shared helpers.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use zeroize::Zeroizing;

use crate::audit::{SecurityEventSink, TracingSink};
use crate::config::Settings;
use crate::device::{find_enrolled, DeviceEvent, SystemMounts};
use crate::envelope::SecretKind;
use crate::errors::{Result, VaultError};
use crate::session::{SessionController, MIN_PASSWORD_LEN};

/// Environment variable read instead of prompting for the password.
pub const PASSWORD_ENV: &str = "USBVAULT_PASSWORD";

/// Environment variable read instead of prompting for the recovery code.
pub const RECOVERY_ENV: &str = "USBVAULT_RECOVERY_CODE";

/// usbvault CLI: encrypted file vault unlocked by a USB key.
#[derive(Parser)]
#[command(
    name = "usbvault",
    about = "Encrypted file vault unlocked by a USB key and a password",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: <config dir>/usbvault/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Vault directory (overrides the config file)
    #[arg(long, global = true)]
    pub vault_dir: Option<PathBuf>,

    /// Use this directory as the USB device root instead of scanning mounts
    #[arg(long, global = true)]
    pub device: Option<PathBuf>,
}

/// How to unlock for one-shot commands.
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct UnlockArgs {
    /// Unlock with the recovery code instead of the password
    #[arg(long)]
    pub recovery: bool,
}

impl UnlockArgs {
    pub fn kind(self) -> SecretKind {
        if self.recovery {
            SecretKind::RecoveryCode
        } else {
            SecretKind::Password
        }
    }
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Enroll a USB device: write the key blob and show the recovery code
    Enroll {
        /// Device root (default: --device, or pick from removable mounts)
        path: Option<PathBuf>,
        /// Replace an existing key blob (the old vault becomes unreadable)
        #[arg(long)]
        force: bool,
    },

    /// List removable mounts and whether they carry a key blob
    Devices,

    /// Show device, enrollment and vault status
    Status,

    /// Print the fingerprint of a device (for `pinned_fingerprint`)
    Fingerprint {
        /// Device root (default: the detected enrolled device)
        path: Option<PathBuf>,
    },

    /// List files in the vault
    List {
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Encrypt a file into the vault
    Add {
        /// File to add
        file: PathBuf,
        /// Keep the source file instead of securely erasing it
        #[arg(long)]
        keep_source: bool,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Decrypt a file out of the vault
    Extract {
        /// Vault id (see `usbvault list`)
        id: String,
        /// Destination directory (default: current directory)
        #[arg(short, long)]
        dest: Option<PathBuf>,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Securely delete a file from the vault
    Delete {
        /// Vault id (see `usbvault list`)
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Interactive session with device monitoring and auto-lock
    Shell,

    /// View the security event log
    Audit {
        /// Number of entries to show (default: 50)
        #[arg(long, default_value = "50")]
        last: usize,
        /// Show entries since a duration ago (e.g. 7d, 24h, 30m)
        #[arg(long)]
        since: Option<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell)
        shell: String,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Load settings from `--config` (or the default location) and apply
/// command-line overrides.
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let path = cli.config.clone().or_else(Settings::default_config_path);
    let mut settings = match path {
        Some(p) => Settings::load(&p)?,
        None => Settings::default(),
    };

    if let Some(dir) = &cli.vault_dir {
        settings.vault_dir = dir.clone();
    }

    tracing::debug!(vault_dir = %settings.vault_dir.display(), "settings loaded");
    Ok(settings)
}

/// The enrolled device root: `--device` if given, otherwise the first
/// removable mount that carries the key blob.
pub fn resolve_device(cli: &Cli, settings: &Settings) -> Result<PathBuf> {
    if let Some(dev) = &cli.device {
        return if dev.is_dir() {
            Ok(dev.clone())
        } else {
            Err(VaultError::DeviceAbsent)
        };
    }

    let mounts = SystemMounts::new(settings.extra_mount_roots.clone());
    find_enrolled(&mounts, &settings.key_file_name).ok_or(VaultError::DeviceAbsent)
}

/// The security event sink: the audit database when available, `tracing` otherwise.
pub fn open_sink(settings: &Settings) -> Arc<dyn SecurityEventSink> {
    #[cfg(feature = "audit-log")]
    {
        if crate::vault::create_private_dir(&settings.vault_dir).is_ok() {
            if let Some(audit) = crate::audit::AuditLog::open(&settings.vault_dir) {
                return Arc::new(audit);
            }
        }
        tracing::debug!("audit database unavailable; security events go to tracing only");
    }

    #[cfg(not(feature = "audit-log"))]
    let _ = settings;

    Arc::new(TracingSink)
}

/// Build a controller, point it at the device, and unlock it.
///
/// Used by the one-shot commands; the caller locks when done (or simply
/// drops the controller, which closes the store).
pub fn unlock_session(cli: &Cli, settings: &Settings, unlock: UnlockArgs) -> Result<SessionController> {
    let device = resolve_device(cli, settings)?;
    let controller = SessionController::from_settings(settings, open_sink(settings));
    controller.handle_device_event(DeviceEvent::Connected(device));

    let kind = unlock.kind();
    let secret = prompt_secret(kind)?;

    match controller.attempt_unlock(&secret, kind) {
        Ok(report) => {
            if let Some(warning) = &report.warning {
                output::report_warning(warning);
            }
            Ok(controller)
        }
        Err(VaultError::AuthenticationFailed) => {
            let remaining = controller.status().remaining_attempts;
            output::warning(&format!("{remaining} attempt(s) remaining before lockout"));
            Err(VaultError::AuthenticationFailed)
        }
        Err(e) => Err(e),
    }
}

/// Get the password or recovery code, trying in order:
/// 1. `USBVAULT_PASSWORD` / `USBVAULT_RECOVERY_CODE` (scripted use)
/// 2. Interactive prompt
///
/// Returns `Zeroizing<String>` so the secret is wiped from memory on drop.
pub fn prompt_secret(kind: SecretKind) -> Result<Zeroizing<String>> {
    let (var, prompt) = match kind {
        SecretKind::Password => (PASSWORD_ENV, "Enter vault password"),
        SecretKind::RecoveryCode => (RECOVERY_ENV, "Enter recovery code"),
    };

    if let Ok(value) = std::env::var(var) {
        if !value.is_empty() {
            return Ok(Zeroizing::new(value));
        }
    }

    let value = dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .map_err(|e| VaultError::CommandFailed(format!("secret prompt: {e}")))?;
    Ok(Zeroizing::new(value))
}

/// Prompt for a new password with confirmation (used during `enroll`).
///
/// Also respects `USBVAULT_PASSWORD` for scripted usage.
/// Enforces a minimum password length.
pub fn prompt_new_password() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            if pw.chars().count() < MIN_PASSWORD_LEN {
                return Err(VaultError::CommandFailed(format!(
                    "password must be at least {MIN_PASSWORD_LEN} characters"
                )));
            }
            return Ok(Zeroizing::new(pw));
        }
    }

    loop {
        let password = dialoguer::Password::new()
            .with_prompt("Choose vault password")
            .with_confirmation(
                "Confirm vault password",
                "Passwords do not match, try again",
            )
            .interact()
            .map_err(|e| VaultError::CommandFailed(format!("password prompt: {e}")))?;

        if password.chars().count() < MIN_PASSWORD_LEN {
            output::warning(&format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters. Try again."
            ));
            continue;
        }

        return Ok(Zeroizing::new(password));
    }
}

/// Ask a yes/no question; `default` is used on plain Enter.
pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()
        .map_err(|e| VaultError::CommandFailed(format!("confirm prompt: {e}")))
}

/// Display form of a device root.
pub fn display_root(path: &Path) -> String {
    path.display().to_string()
}
