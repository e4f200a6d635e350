//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::crypto::recovery::display_grouped;
use crate::errors::VaultError;
use crate::vault::VaultEntry;

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// Print a possible-tampering alert that must not be missed.
pub fn alert(msg: &str) {
    eprintln!(
        "{} {}",
        style("SECURITY").red().bold().reverse(),
        style(msg).red().bold()
    );
}

/// Print an error, escalating tamper signals to an alert.
pub fn report_error(err: &VaultError) {
    if err.is_tamper_signal() {
        alert(&err.to_string());
    } else {
        error(&err.to_string());
    }
}

/// Print a non-fatal condition attached to a successful operation.
pub fn report_warning(warning: &VaultError) {
    if warning.is_tamper_signal() {
        alert(&warning.to_string());
    } else {
        self::warning(&warning.to_string());
    }
}

/// Show the recovery code once, grouped for transcription.
pub fn print_recovery_code(code: &str) {
    println!();
    println!("  Recovery code: {}", style(display_grouped(code)).bold());
    println!();
    warning("Write this code down now. It is shown only once and is not stored anywhere.");
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Print a table of vault entries (Id, Name, Size, Added).
pub fn print_entries_table(entries: &[VaultEntry]) {
    if entries.is_empty() {
        info("The vault is empty.");
        tip("Run `usbvault add <FILE>` to add your first file.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Id", "Name", "Size", "Added"]);

    for e in entries {
        table.add_row(vec![
            e.vault_id.clone(),
            e.original_name.clone(),
            format_size(e.size_bytes),
            e.added_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }

    println!("{table}");
}
