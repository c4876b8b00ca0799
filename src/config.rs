//! Store configuration
//!
//! The configuration surface consumed (never produced) by the core:
//! directory layout, expiry limits, sweep cadence, and token shape.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration for a content store instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root data directory (required)
    pub data_dir: String,

    /// Blob storage root (default: `<data_dir>/blobs`)
    #[serde(default)]
    pub blob_root: Option<String>,

    /// Maximum TTL in seconds (default: 1 year)
    #[serde(default = "default_max_ttl")]
    pub max_ttl_seconds: i64,

    /// Maximum value accepted for max_reads (default: 25565)
    #[serde(default = "default_max_read_limit")]
    pub max_read_limit: u32,

    /// Minimum interval between sweeps in seconds (default: 1 hour)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: i64,

    /// Alphabet for pickup codes (default: digits + uppercase letters)
    #[serde(default = "default_code_alphabet")]
    pub code_alphabet: String,

    /// Pickup code length (default: 6)
    #[serde(default = "default_code_length")]
    pub code_length: usize,

    /// Token generation attempts before giving up (default: 5)
    #[serde(default = "default_token_retry_limit")]
    pub token_retry_limit: u32,

    /// Age before an unreferenced blob is collected (default: 1 hour)
    #[serde(default = "default_orphan_grace")]
    pub orphan_grace_seconds: i64,

    /// Bound on metadata lock acquisition in milliseconds (default: 5000)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_max_ttl() -> i64 {
    31536000
} // 1 year
fn default_max_read_limit() -> u32 {
    25565
}
fn default_sweep_interval() -> i64 {
    3600
} // 1 hour
fn default_code_alphabet() -> String {
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string()
}
fn default_code_length() -> usize {
    6
}
fn default_token_retry_limit() -> u32 {
    5
}
fn default_orphan_grace() -> i64 {
    3600
}
fn default_lock_timeout_ms() -> u64 {
    5000
}

impl StoreConfig {
    /// Create a config rooted at the given data directory, defaults elsewhere.
    pub fn with_data_dir(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            blob_root: None,
            max_ttl_seconds: default_max_ttl(),
            max_read_limit: default_max_read_limit(),
            sweep_interval_seconds: default_sweep_interval(),
            code_alphabet: default_code_alphabet(),
            code_length: default_code_length(),
            token_retry_limit: default_token_retry_limit(),
            orphan_grace_seconds: default_orphan_grace(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.data_dir.is_empty() {
            return Err("data_dir must not be empty".to_string());
        }
        if self.max_ttl_seconds <= 0 {
            return Err("max_ttl_seconds must be > 0".to_string());
        }
        if self.sweep_interval_seconds <= 0 {
            return Err("sweep_interval_seconds must be > 0".to_string());
        }
        if self.code_alphabet.len() < 2 {
            return Err("code_alphabet must contain at least 2 characters".to_string());
        }
        if !self.code_alphabet.is_ascii() {
            return Err("code_alphabet must be ASCII".to_string());
        }
        if self.code_length < 4 {
            return Err("code_length must be >= 4".to_string());
        }
        if self.token_retry_limit == 0 {
            return Err("token_retry_limit must be >= 1".to_string());
        }
        if self.orphan_grace_seconds < 0 {
            return Err("orphan_grace_seconds must be >= 0".to_string());
        }
        if self.lock_timeout_ms == 0 {
            return Err("lock_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }

    /// Get the data directory as a Path
    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    /// Get the metadata directory (`<data_dir>/meta`)
    pub fn meta_path(&self) -> PathBuf {
        self.data_path().join("meta")
    }

    /// Get the blob root, falling back to `<data_dir>/blobs`
    pub fn blob_path(&self) -> PathBuf {
        match &self.blob_root {
            Some(root) => PathBuf::from(root),
            None => self.data_path().join("blobs"),
        }
    }
}
