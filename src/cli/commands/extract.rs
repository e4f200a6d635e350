//! `usbvault extract`: decrypt a vault file to disk.

use std::path::Path;

use crate::cli::output;
use crate::cli::{load_settings, unlock_session, Cli, UnlockArgs};
use crate::errors::Result;

/// Execute the `extract` command.
pub fn execute(cli: &Cli, id: &str, dest: Option<&Path>, unlock: UnlockArgs) -> Result<()> {
    let dest = match dest {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir()?,
    };

    let settings = load_settings(cli)?;
    let session = unlock_session(cli, &settings, unlock)?;

    let written = session.extract_file(id, &dest)?;
    output::success(&format!("Extracted to {}", written.display()));
    output::tip("The extracted copy is plaintext; delete it when you are done.");

    session.request_lock();
    Ok(())
}
