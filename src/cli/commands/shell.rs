//! `usbvault shell`: long-running interactive session.
//!
//! Starts the device monitor and the session reactor, then reads
//! commands from the terminal.  Removing the USB key or staying idle
//! past `auto_lock_secs` locks the vault; notices are printed before the
//! next prompt.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use dialoguer::Input;

use crate::cli::output;
use crate::cli::{display_root, load_settings, open_sink, prompt_secret, Cli};
use crate::device::{DeviceMonitor, FixedMounts};
use crate::envelope::SecretKind;
use crate::errors::{Result, VaultError};
use crate::session::{SessionController, SessionEvent};

/// How often the reactor evaluates the lockout and idle timers.
const REACTOR_TICK: Duration = Duration::from_millis(250);

const HELP: &str = "\
Commands:
  unlock                  unlock with the password
  recover                 unlock with the recovery code
  lock                    lock the vault now
  list                    list vault files
  add <FILE>              encrypt a file into the vault
  extract <ID> [DIR]      decrypt a file (default: current directory)
  delete <ID>             securely delete a file
  status                  session state and timers
  help                    this text
  quit                    lock and exit";

/// Execute the `shell` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    let controller = Arc::new(SessionController::from_settings(
        &settings,
        open_sink(&settings),
    ));
    let events = controller.subscribe();

    let mut monitor = match &cli.device {
        Some(dev) => DeviceMonitor::new(
            FixedMounts(vec![dev.clone()]),
            settings.key_file_name.clone(),
            settings.poll_interval(),
        ),
        None => DeviceMonitor::from_settings(&settings),
    };
    let device_events = monitor.subscribe();
    monitor.start()?;
    let mut reactor = controller.spawn_reactor(device_events, REACTOR_TICK)?;

    output::info("usbvault shell. Type `help` for commands.");

    loop {
        print_notices(&events);

        let prompt = if controller.is_unlocked() {
            "usbvault (unlocked)"
        } else {
            "usbvault (locked)"
        };
        let line = Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| VaultError::CommandFailed(format!("input: {e}")))?;

        // Anything that happened while we were waiting for input.
        print_notices(&events);

        let line = line.trim();
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let result = match cmd {
            "" => Ok(()),
            "quit" | "exit" => break,
            "help" => {
                println!("{HELP}");
                Ok(())
            }
            "unlock" => unlock(&controller, SecretKind::Password),
            "recover" => unlock(&controller, SecretKind::RecoveryCode),
            "lock" => {
                if controller.request_lock() {
                    output::success("Vault locked.");
                } else {
                    output::info("Vault is already locked.");
                }
                Ok(())
            }
            "list" => controller
                .list_entries()
                .map(|entries| output::print_entries_table(&entries)),
            "add" => add(&controller, rest),
            "extract" => extract(&controller, rest),
            "delete" => delete(&controller, rest),
            "status" => {
                print_status(&controller);
                Ok(())
            }
            other => {
                output::warning(&format!("unknown command '{other}' (try `help`)"));
                Ok(())
            }
        };

        if let Err(e) = result {
            output::report_error(&e);
        }
    }

    controller.request_lock();
    reactor.stop();
    monitor.stop();
    print_notices(&events);
    Ok(())
}

fn unlock(controller: &SessionController, kind: SecretKind) -> Result<()> {
    if controller.is_unlocked() {
        output::info("Vault is already unlocked.");
        return Ok(());
    }

    let secret = prompt_secret(kind)?;
    match controller.attempt_unlock(&secret, kind) {
        Ok(report) => {
            output::success(&format!(
                "Unlocked{} ({} file(s))",
                if report.recovery {
                    " with recovery code"
                } else {
                    ""
                },
                report.entry_count
            ));
            if let Some(w) = &report.warning {
                output::report_warning(w);
            }
            Ok(())
        }
        Err(VaultError::AuthenticationFailed) => {
            output::error(&VaultError::AuthenticationFailed.to_string());
            let remaining = controller.status().remaining_attempts;
            if remaining > 0 {
                output::warning(&format!("{remaining} attempt(s) remaining before lockout"));
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn add(controller: &SessionController, arg: &str) -> Result<()> {
    if arg.is_empty() {
        return Err(VaultError::CommandFailed("usage: add <FILE>".into()));
    }
    let outcome = controller.add_file(Path::new(arg))?;
    output::success(&format!(
        "Added '{}' as {}",
        outcome.entry.original_name, outcome.entry.vault_id
    ));
    if let Some(w) = &outcome.warning {
        output::report_warning(w);
    }
    Ok(())
}

fn extract(controller: &SessionController, arg: &str) -> Result<()> {
    let (id, dest) = match arg.split_once(' ') {
        Some((id, dest)) => (id, Path::new(dest.trim()).to_path_buf()),
        None if !arg.is_empty() => (arg, std::env::current_dir()?),
        None => {
            return Err(VaultError::CommandFailed(
                "usage: extract <ID> [DIR]".into(),
            ))
        }
    };
    let written = controller.extract_file(id, &dest)?;
    output::success(&format!("Extracted to {}", written.display()));
    Ok(())
}

fn delete(controller: &SessionController, arg: &str) -> Result<()> {
    if arg.is_empty() {
        return Err(VaultError::CommandFailed("usage: delete <ID>".into()));
    }
    let outcome = controller.delete_file(arg)?;
    output::success(&format!("Deleted '{}'", outcome.entry.original_name));
    if let Some(w) = &outcome.warning {
        output::report_warning(w);
    }
    Ok(())
}

fn print_status(controller: &SessionController) {
    let status = controller.status();
    println!(
        "  Vault:    {}",
        if status.unlocked { "unlocked" } else { "locked" }
    );
    match &status.device {
        Some(d) => println!("  Device:   {}", display_root(d)),
        None => println!("  Device:   not connected"),
    }
    if let Some(n) = status.entry_count {
        println!("  Files:    {n}");
    }
    if let Some(left) = status.lockout_remaining {
        println!("  Lockout:  {}s remaining", left.as_secs() + 1);
    } else if !status.unlocked {
        println!(
            "  Attempts: {} of {} remaining",
            status.remaining_attempts,
            controller.policy().max_failed_attempts
        );
    }
    if let Some(idle) = status.idle_remaining {
        println!("  Auto-lock in {}s", idle.as_secs());
    }
}

fn print_notices(events: &Receiver<SessionEvent>) {
    for event in events.try_iter() {
        match event {
            SessionEvent::DeviceConnected(path) => {
                output::info(&format!("USB key detected at {}", display_root(&path)))
            }
            SessionEvent::DeviceDisconnected => output::warning("USB key removed."),
            SessionEvent::Locked(reason) => output::warning(&format!("Vault locked ({reason}).")),
            SessionEvent::LockoutExpired => output::info("Lockout expired; you may try again."),
            SessionEvent::AuthResult(_) => {}
        }
    }
}
