//! One module per subcommand.  Each exposes an `execute` function that
//! `main` dispatches to.

pub mod add;
pub mod audit_cmd;
pub mod completions;
pub mod delete;
pub mod devices;
pub mod enroll;
pub mod extract;
pub mod fingerprint;
pub mod list;
pub mod shell;
pub mod status;
