//! `usbvault delete`: securely erase a file from the vault.

use crate::cli::output;
use crate::cli::{confirm, load_settings, unlock_session, Cli, UnlockArgs};
use crate::errors::Result;

/// Execute the `delete` command.
pub fn execute(cli: &Cli, id: &str, force: bool, unlock: UnlockArgs) -> Result<()> {
    if !force && !confirm(&format!("Permanently delete vault entry '{id}'?"), false)? {
        output::info("Cancelled.");
        return Ok(());
    }

    let settings = load_settings(cli)?;
    let session = unlock_session(cli, &settings, unlock)?;

    let outcome = session.delete_file(id)?;
    output::success(&format!(
        "Deleted '{}' ({})",
        outcome.entry.original_name, outcome.entry.vault_id
    ));
    if let Some(w) = &outcome.warning {
        output::report_warning(w);
    }

    session.request_lock();
    Ok(())
}
