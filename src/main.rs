use std::io;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use usbvault::cli::{commands, output, Cli, Commands};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("USBVAULT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    usbvault::platform::harden_process();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Enroll { ref path, force } => {
            commands::enroll::execute(&cli, path.as_deref(), force)
        }
        Commands::Devices => commands::devices::execute(&cli),
        Commands::Status => commands::status::execute(&cli),
        Commands::Fingerprint { ref path } => commands::fingerprint::execute(&cli, path.as_deref()),
        Commands::List { unlock } => commands::list::execute(&cli, unlock),
        Commands::Add {
            ref file,
            keep_source,
            unlock,
        } => commands::add::execute(&cli, file, keep_source, unlock),
        Commands::Extract {
            ref id,
            ref dest,
            unlock,
        } => commands::extract::execute(&cli, id, dest.as_deref(), unlock),
        Commands::Delete {
            ref id,
            force,
            unlock,
        } => commands::delete::execute(&cli, id, force, unlock),
        Commands::Shell => commands::shell::execute(&cli),
        Commands::Audit { last, ref since } => {
            commands::audit_cmd::execute(&cli, last, since.as_deref())
        }
        Commands::Completions { ref shell } => commands::completions::execute(shell),
    };

    if let Err(e) = result {
        output::report_error(&e);
        std::process::exit(1);
    }
}
