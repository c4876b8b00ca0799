//! Process-wide scalar settings
//!
//! A small persisted key-value table for store-level state that is not a
//! record, such as the last sweep time. Mutations go through one mutex and
//! are written back atomically (temp file + rename + fsync), so the
//! update-first sweep discipline survives process restarts.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::errors::{MetaError, MetaResult};

/// Key under which the last sweep time (unix seconds) is stored
pub const LAST_SWEEP_AT: &str = "last_sweep_at";

/// Persisted key-value settings store
pub struct SettingsStore {
    path: PathBuf,
    inner: Mutex<HashMap<String, String>>,
}

impl SettingsStore {
    /// Open the settings file, creating an empty store if missing
    pub fn open(path: &Path) -> MetaResult<Self> {
        let map = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                MetaError::ReadFailed(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                MetaError::ReadFailed(format!("Invalid settings JSON: {}", e))
            })?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(map),
        })
    }

    /// Read an integer setting
    pub fn get_i64(&self, key: &str) -> MetaResult<Option<i64>> {
        let map = self.inner.lock().map_err(|_| MetaError::LockPoisoned)?;
        Ok(map.get(key).and_then(|v| v.parse().ok()))
    }

    /// Write an integer setting, persisting before returning
    pub fn set_i64(&self, key: &str, value: i64) -> MetaResult<()> {
        let mut map = self.inner.lock().map_err(|_| MetaError::LockPoisoned)?;
        map.insert(key.to_string(), value.to_string());
        persist(&self.path, &map)
    }

    /// Conditionally replace an integer setting.
    ///
    /// The read, the predicate, and the write happen under one lock, so two
    /// concurrent callers cannot both observe the old value and both win.
    /// Returns whether the swap happened.
    pub fn swap_i64_if<F>(&self, key: &str, new: i64, cond: F) -> MetaResult<bool>
    where
        F: FnOnce(Option<i64>) -> bool,
    {
        let mut map = self.inner.lock().map_err(|_| MetaError::LockPoisoned)?;
        let current = map.get(key).and_then(|v| v.parse().ok());

        if !cond(current) {
            return Ok(false);
        }

        map.insert(key.to_string(), new.to_string());
        persist(&self.path, &map)?;
        Ok(true)
    }
}

fn persist(path: &Path, map: &HashMap<String, String>) -> MetaResult<()> {
    let tmp_path = path.with_extension("json.tmp");

    let body = serde_json::to_vec_pretty(map)
        .map_err(|e| MetaError::WriteFailed(format!("Settings serialization failed: {}", e)))?;

    {
        let mut tmp = File::create(&tmp_path).map_err(|e| {
            MetaError::WriteFailed(format!("Failed to create {}: {}", tmp_path.display(), e))
        })?;
        tmp.write_all(&body)
            .map_err(|e| MetaError::WriteFailed(format!("Settings write failed: {}", e)))?;
        tmp.sync_all()
            .map_err(|e| MetaError::WriteFailed(format!("Settings fsync failed: {}", e)))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| MetaError::WriteFailed(format!("Settings rename failed: {}", e)))?;

    Ok(())
}
