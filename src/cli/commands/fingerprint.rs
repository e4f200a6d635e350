//! `usbvault fingerprint`: print the hardware fingerprint of a device.

use std::path::Path;

use crate::cli::output;
use crate::cli::{display_root, load_settings, resolve_device, Cli};
use crate::device::fingerprint;
use crate::errors::Result;

/// Execute the `fingerprint` command.
pub fn execute(cli: &Cli, path: Option<&Path>) -> Result<()> {
    let device = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let settings = load_settings(cli)?;
            resolve_device(cli, &settings)?
        }
    };

    let fp = fingerprint(&device)?;
    output::info(&format!("Fingerprint of {}:", display_root(&device)));
    println!("{fp}");
    output::tip("Set `pinned_fingerprint` in config.toml to bind the vault to this device.");
    Ok(())
}
