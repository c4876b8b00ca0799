//! CLI argument definitions using clap
//!
//! Commands:
//! - dropnote init --config <path>
//! - dropnote put-text <text> --config <path>
//! - dropnote put-file <path> --config <path>
//! - dropnote get <token> --config <path>
//! - dropnote sweep --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dropnote - a self-hostable ephemeral content drop
#[derive(Parser, Debug)]
#[command(name = "dropnote")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the store layout and write a default config if missing
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./dropnote.json")]
        config: PathBuf,
    },

    /// Deposit inline text and print the pickup token
    PutText {
        /// The text to share
        text: String,

        /// Seconds until expiry
        #[arg(long, default_value_t = 86400)]
        ttl: i64,

        /// Read budget (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        reads: u32,

        /// Hand back a long identifier instead of a pickup code
        #[arg(long)]
        long_token: bool,

        /// Path to configuration file
        #[arg(long, default_value = "./dropnote.json")]
        config: PathBuf,
    },

    /// Deposit a file and print the pickup token
    PutFile {
        /// Path of the file to share
        path: PathBuf,

        /// Seconds until expiry
        #[arg(long, default_value_t = 86400)]
        ttl: i64,

        /// Read budget (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        reads: u32,

        /// Path to configuration file
        #[arg(long, default_value = "./dropnote.json")]
        config: PathBuf,
    },

    /// Redeem a token: print text to stdout, or write the blob to --out
    Get {
        /// The pickup token
        token: String,

        /// Where to write blob content (defaults to the original filename)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Path to configuration file
        #[arg(long, default_value = "./dropnote.json")]
        config: PathBuf,
    },

    /// Run a garbage-collection pass now
    Sweep {
        /// Path to configuration file
        #[arg(long, default_value = "./dropnote.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
