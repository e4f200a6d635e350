//! `usbvault status`: device, enrollment and vault overview.
//!
//! Never prompts for a secret; the vault itself stays locked.

use console::style;

use crate::cli::output;
use crate::cli::{display_root, load_settings, resolve_device, Cli};
use crate::errors::{Result, VaultError};

/// Execute the `status` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;

    println!("{}", style("usbvault status").bold());
    println!("  Vault dir:   {}", settings.vault_dir.display());
    println!(
        "  Index:       {}",
        if settings.index_path().is_file() {
            "present"
        } else {
            "none yet"
        }
    );
    if settings.audit_db_path().is_file() {
        println!("  Audit log:   {}", settings.audit_db_path().display());
    }

    match resolve_device(cli, &settings) {
        Ok(device) => {
            let enrolled = device.join(&settings.key_file_name).is_file();
            println!("  Device:      {}", display_root(&device));
            println!(
                "  Enrolled:    {}",
                if enrolled {
                    style("yes").green()
                } else {
                    style("no").yellow()
                }
            );
        }
        Err(VaultError::DeviceAbsent) => {
            println!("  Device:      {}", style("not connected").yellow());
        }
        Err(e) => return Err(e),
    }

    println!(
        "  Pinned:      {}",
        if settings.pinned_fingerprint.is_some() {
            "yes"
        } else {
            "no"
        }
    );
    println!(
        "  Lockout:     {} attempts, {}s",
        settings.max_failed_attempts, settings.lockout_secs
    );
    match settings.auto_lock_timeout() {
        Some(t) => println!("  Auto-lock:   {}s idle", t.as_secs()),
        None => println!("  Auto-lock:   off"),
    }

    if !settings.index_path().is_file() {
        output::tip("Run `usbvault enroll` and then `usbvault add <FILE>` to get started.");
    }
    Ok(())
}
