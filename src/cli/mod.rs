//! CLI module for dropnote
//!
//! Provides a thin command-line boundary over the store:
//! - init: create the store layout and a default config file
//! - put-text / put-file: deposit content, print the pickup token
//! - get: redeem a token, print text or write the file
//! - sweep: run a garbage-collection pass now

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::run_command;
pub use errors::{CliError, CliResult};

/// Parse arguments and dispatch
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}
