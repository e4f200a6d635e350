//! `usbvault list`: display the vault contents in a table.

use crate::cli::output;
use crate::cli::{load_settings, unlock_session, Cli, UnlockArgs};
use crate::errors::Result;

/// Execute the `list` command.
pub fn execute(cli: &Cli, unlock: UnlockArgs) -> Result<()> {
    let settings = load_settings(cli)?;
    let session = unlock_session(cli, &settings, unlock)?;

    let entries = session.list_entries()?;
    output::info(&format!("{} file(s) in the vault", entries.len()));
    output::print_entries_table(&entries);

    session.request_lock();
    Ok(())
}
