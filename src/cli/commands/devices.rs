//! `usbvault devices`: show candidate mounts and which carry a key blob.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::cli::output;
use crate::cli::{display_root, load_settings, Cli};
use crate::device::{MountSource, SystemMounts};
use crate::errors::Result;

/// Execute the `devices` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;

    let mut roots = SystemMounts::new(settings.extra_mount_roots.clone()).candidate_roots();
    if let Some(dev) = &cli.device {
        if !roots.contains(dev) {
            roots.insert(0, dev.clone());
        }
    }

    if roots.is_empty() {
        output::info("No removable mounts found.");
        output::tip("Plug in the USB key, or list its mount point under `extra_mount_roots`.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Mount", "Enrolled"]);

    for root in &roots {
        let enrolled = if root.join(&settings.key_file_name).is_file() {
            style("yes").green().to_string()
        } else {
            style("no").dim().to_string()
        };
        table.add_row(vec![display_root(root), enrolled]);
    }

    println!("{table}");
    Ok(())
}
