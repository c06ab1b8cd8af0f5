//! CLI module
//!
//! Provides command-line interface for:
//! - init: Write a configuration with a fresh secret
//! - serve: Validate configuration, then serve and collect garbage
//! - sign-upload / sign-download: Print URLs for one key
//! - sweep: One-shot garbage collection

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{init, run_command, serve, sign_download, sign_upload, sweep};
pub use errors::{CliError, CliErrorCode, CliResult};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}
