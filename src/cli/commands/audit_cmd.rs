//! `usbvault audit`: display the security event log.
//!
//! Usage:
//!   usbvault audit               # show last 50 entries
//!   usbvault audit --last 20     # show last 20
//!   usbvault audit --since 7d    # entries from last 7 days

use chrono::Utc;

use crate::cli::Cli;
use crate::errors::{Result, VaultError};

/// Execute the `audit` command.
#[cfg(feature = "audit-log")]
pub fn execute(cli: &Cli, last: usize, since: Option<&str>) -> Result<()> {
    use crate::audit::AuditLog;
    use crate::cli::{load_settings, output};

    let settings = load_settings(cli)?;
    if !settings.audit_db_path().is_file() {
        output::info("No security events recorded yet.");
        return Ok(());
    }

    let audit = AuditLog::open(&settings.vault_dir)
        .ok_or_else(|| VaultError::AuditError("failed to open audit database".into()))?;

    let since_dt = match since {
        Some(s) => Some(parse_duration(s)?),
        None => None,
    };

    let entries = audit.query(last, since_dt)?;

    if entries.is_empty() {
        output::info("No security events found.");
        return Ok(());
    }

    print_audit_table(&entries);

    Ok(())
}

#[cfg(not(feature = "audit-log"))]
pub fn execute(_cli: &Cli, _last: usize, since: Option<&str>) -> Result<()> {
    if let Some(s) = since {
        parse_duration(s)?;
    }
    Err(VaultError::AuditError(
        "this build has no audit log (rebuild with the `audit-log` feature)".into(),
    ))
}

/// Parse a human-friendly duration string like "7d", "24h", "30m".
fn parse_duration(input: &str) -> Result<chrono::DateTime<Utc>> {
    let input = input.trim();

    let (num_str, unit) = if let Some(s) = input.strip_suffix('d') {
        (s, 'd')
    } else if let Some(s) = input.strip_suffix('h') {
        (s, 'h')
    } else if let Some(s) = input.strip_suffix('m') {
        (s, 'm')
    } else {
        return Err(VaultError::CommandFailed(format!(
            "invalid duration '{input}' (use a format like 7d, 24h, or 30m)"
        )));
    };

    let num: i64 = num_str.parse().map_err(|_| {
        VaultError::CommandFailed(format!("invalid duration '{input}': number part is not valid"))
    })?;

    let duration = match unit {
        'd' => chrono::Duration::days(num),
        'h' => chrono::Duration::hours(num),
        _ => chrono::Duration::minutes(num),
    };

    Ok(Utc::now() - duration)
}

/// Print security events in a formatted table.
#[cfg(feature = "audit-log")]
pub fn print_audit_table(entries: &[crate::audit::AuditEntry]) {
    use comfy_table::{ContentArrangement, Table};
    use console::style;

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Event", "Level", "Details"]);

    for entry in entries {
        table.add_row(vec![
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            colorize_event(&entry.event, &entry.level),
            entry.level.clone(),
            entry.details.clone().unwrap_or_else(|| "-".into()),
        ]);
    }

    println!(
        "{}",
        style(format!("{} security events:", entries.len())).bold()
    );
    println!("{table}");
}

/// Colorize event names by severity level.
#[cfg(feature = "audit-log")]
fn colorize_event(event: &str, level: &str) -> String {
    use console::style;

    match level {
        "failure" => style(event).red().bold().to_string(),
        "warning" => style(event).yellow().to_string(),
        _ if event == "AUTH_SUCCESS" || event == "ENROLLED" => style(event).green().to_string(),
        _ => event.to_string(),
    }
}
