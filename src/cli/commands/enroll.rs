//! `usbvault enroll`: write a new key blob to a USB device.
//!
//! Usage:
//!   usbvault enroll                 # pick from removable mounts
//!   usbvault enroll /media/me/KEY   # explicit device root
//!   usbvault enroll --force         # replace an existing key blob

use std::path::{Path, PathBuf};

use dialoguer::Select;

use crate::cli::output;
use crate::cli::{confirm, display_root, load_settings, open_sink, prompt_new_password, Cli};
use crate::config::Settings;
use crate::device::{MountSource, SystemMounts};
use crate::errors::{Result, VaultError};
use crate::session::SessionController;

/// Execute the `enroll` command.
pub fn execute(cli: &Cli, path: Option<&Path>, force: bool) -> Result<()> {
    let settings = load_settings(cli)?;
    let device = match path.or(cli.device.as_deref()) {
        Some(p) => p.to_path_buf(),
        None => pick_device(&settings)?,
    };

    if !device.is_dir() {
        return Err(VaultError::CommandFailed(format!(
            "{} is not a directory",
            device.display()
        )));
    }

    let controller = SessionController::from_settings(&settings, open_sink(&settings));
    let key_path = controller.envelope().key_path(&device);

    if controller.envelope().is_enrolled(&device) {
        if !force {
            return Err(VaultError::AlreadyEnrolled(key_path));
        }
        output::warning(
            "Re-enrolling creates a new master key. Files already in the vault will no longer decrypt.",
        );
        if !confirm("Replace the existing key blob?", false)? {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    let password = prompt_new_password()?;
    let code = controller.setup_enroll(&device, &password, force)?;

    output::success(&format!("Enrolled {}", display_root(&device)));
    output::print_recovery_code(&code);
    output::tip(&format!("Key blob: {}", key_path.display()));
    output::tip("Run `usbvault add <FILE>` to add your first file.");

    Ok(())
}

fn pick_device(settings: &Settings) -> Result<PathBuf> {
    let mut roots = SystemMounts::new(settings.extra_mount_roots.clone()).candidate_roots();
    match roots.len() {
        0 => Err(VaultError::DeviceAbsent),
        1 => Ok(roots.remove(0)),
        _ => {
            let labels: Vec<String> = roots.iter().map(|r| display_root(r)).collect();
            let choice = Select::new()
                .with_prompt("Select the USB device to enroll")
                .items(&labels)
                .default(0)
                .interact()
                .map_err(|e| VaultError::CommandFailed(format!("device prompt: {e}")))?;
            Ok(roots.swap_remove(choice))
        }
    }
}
