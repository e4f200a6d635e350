//! `usbvault add`: encrypt a file into the vault.
//!
//! The source file is securely erased afterwards unless `--keep-source`
//! is given or `wipe_source_on_add = false` in the config.

use std::path::Path;

use crate::cli::output;
use crate::cli::{load_settings, unlock_session, Cli, UnlockArgs};
use crate::errors::{Result, VaultError};

/// Execute the `add` command.
pub fn execute(cli: &Cli, file: &Path, keep_source: bool, unlock: UnlockArgs) -> Result<()> {
    if !file.is_file() {
        return Err(VaultError::CommandFailed(format!(
            "{} is not a regular file",
            file.display()
        )));
    }

    let settings = load_settings(cli)?;
    let wipe = settings.wipe_source_on_add && !keep_source;
    let session = unlock_session(cli, &settings, unlock)?;

    let outcome = session.add_file_with(file, wipe)?;
    output::success(&format!(
        "Added '{}' as {} ({})",
        outcome.entry.original_name,
        outcome.entry.vault_id,
        output::format_size(outcome.entry.size_bytes)
    ));
    match &outcome.warning {
        Some(w) => output::report_warning(w),
        None if wipe => output::info("Source file securely erased."),
        None => {}
    }

    session.request_lock();
    Ok(())
}
