//! CLI command implementations
//!
//! Each command loads the JSON config, opens the store, performs one
//! operation, and prints a JSON response line.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::config::StoreConfig;
use crate::store::{ContentStore, CreateOptions, RedeemedContent};
use crate::token::TokenStyle;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Dispatch a parsed command
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Init { config } => init(&config),
        Command::PutText {
            text,
            ttl,
            reads,
            long_token,
            config,
        } => put_text(&config, text, ttl, reads, long_token),
        Command::PutFile {
            path,
            ttl,
            reads,
            config,
        } => put_file(&config, &path, ttl, reads),
        Command::Get { token, out, config } => get(&config, &token, out),
        Command::Sweep { config } => sweep(&config),
    }
}

fn load_config(path: &Path) -> CliResult<StoreConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

    let config: StoreConfig = serde_json::from_str(&content)
        .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

    config.validate().map_err(CliError::config_error)?;

    Ok(config)
}

fn open_store(config_path: &Path) -> CliResult<ContentStore> {
    let config = load_config(config_path)?;
    Ok(ContentStore::open(config)?)
}

fn init(config_path: &Path) -> CliResult<()> {
    if !config_path.exists() {
        let default = StoreConfig::with_data_dir("./dropnote-data");
        fs::write(config_path, serde_json::to_vec_pretty(&default)?)?;
    }

    // Opening the store creates the full directory layout
    let store = open_store(config_path)?;

    println!(
        "{}",
        json!({
            "status": "success",
            "data_dir": store.config().data_dir,
        })
    );
    Ok(())
}

fn put_text(
    config_path: &Path,
    text: String,
    ttl: i64,
    reads: u32,
    long_token: bool,
) -> CliResult<()> {
    let store = open_store(config_path)?;

    let opts = CreateOptions {
        ttl_seconds: ttl,
        max_reads: reads,
        token_style: if long_token {
            TokenStyle::LongId
        } else {
            TokenStyle::PickupCode
        },
        ..Default::default()
    };
    let token = store.create_text(text, opts)?;

    println!("{}", json!({ "status": "success", "token": token }));
    Ok(())
}

fn put_file(config_path: &Path, path: &Path, ttl: i64, reads: u32) -> CliResult<()> {
    let store = open_store(config_path)?;

    let display_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    let mut file = File::open(path)
        .map_err(|e| CliError::io_error(format!("Failed to open {}: {}", path.display(), e)))?;

    let opts = CreateOptions {
        ttl_seconds: ttl,
        max_reads: reads,
        ..Default::default()
    };
    let token = store.create_blob(&mut file, display_name, opts)?;

    println!("{}", json!({ "status": "success", "token": token }));
    Ok(())
}

fn get(config_path: &Path, token: &str, out: Option<PathBuf>) -> CliResult<()> {
    let store = open_store(config_path)?;
    let redeemed = store.redeem(token)?;

    match redeemed.content {
        RedeemedContent::Inline(bytes) => {
            let mut stdout = io::stdout();
            io::Write::write_all(&mut stdout, &bytes)?;
            if !bytes.ends_with(b"\n") {
                io::Write::write_all(&mut stdout, b"\n")?;
            }
        }
        RedeemedContent::Blob(blob_ref) => {
            let out_path = out
                .or_else(|| redeemed.display_name.clone().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(token));

            let (mut blob, _size) = store.blobs().open_blob(&blob_ref).map_err(|e| {
                CliError::io_error(format!("Failed to open blob: {}", e))
            })?;
            let mut file = File::create(&out_path).map_err(|e| {
                CliError::io_error(format!("Failed to create {}: {}", out_path.display(), e))
            })?;
            io::copy(&mut blob, &mut file)?;

            eprintln!("wrote {}", out_path.display());
        }
    }

    eprintln!(
        "{}",
        json!({
            "status": "success",
            "read_count": redeemed.read_count,
            "max_reads": redeemed.max_reads,
            "expires_at": redeemed.expires_at.to_rfc3339(),
            "checksum": redeemed.checksum,
            "flags": redeemed.flags,
        })
    );
    Ok(())
}

fn sweep(config_path: &Path) -> CliResult<()> {
    let store = open_store(config_path)?;
    let deleted = store.sweep()?;

    println!("{}", json!({ "status": "success", "deleted": deleted }));
    Ok(())
}
