//! Append-only record log
//!
//! The log is the durable form of the record table: full record states and
//! tombstones, appended with fsync, checksummed per entry. Replay resolves
//! the latest entry per token (tombstones remove). Corruption is a hard
//! error; an ephemeral store is rebuilt rather than served from bad bytes.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use super::errors::{MetaError, MetaResult};
use crate::record::{decode_entry, encode_entry, LogEntry, Record};

const MIN_ENTRY_SIZE: u64 = 4 + 1 + 4 + 4;

/// Append-only writer for the record log
pub struct LogWriter {
    path: PathBuf,
    file: File,
    current_offset: u64,
}

impl LogWriter {
    /// Open or create the log at the given path
    pub fn open(path: &Path) -> MetaResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                MetaError::WriteFailed(format!(
                    "Failed to create metadata directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                MetaError::WriteFailed(format!("Failed to open {}: {}", path.display(), e))
            })?;

        let current_offset = file
            .metadata()
            .map_err(|e| MetaError::WriteFailed(format!("Failed to stat log: {}", e)))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            current_offset,
        })
    }

    /// The log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end-of-log offset
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Append an entry with fsync enforcement.
    ///
    /// Returns the byte offset where the entry was written.
    pub fn append(&mut self, entry: &LogEntry) -> MetaResult<u64> {
        let encoded = encode_entry(entry);
        let offset = self.current_offset;

        self.file.write_all(&encoded).map_err(|e| {
            MetaError::WriteFailed(format!("Failed to append entry for {}: {}", entry.token(), e))
        })?;

        self.file.sync_all().map_err(|e| {
            MetaError::WriteFailed(format!("fsync failed for {}: {}", entry.token(), e))
        })?;

        self.current_offset += encoded.len() as u64;
        Ok(offset)
    }
}

/// Sequential reader over the record log
pub struct LogReader {
    reader: BufReader<File>,
    current_offset: u64,
    file_size: u64,
}

impl LogReader {
    /// Open the log for reading
    pub fn open(path: &Path) -> MetaResult<Self> {
        let file = File::open(path)
            .map_err(|e| MetaError::ReadFailed(format!("Failed to open {}: {}", path.display(), e)))?;

        let file_size = file
            .metadata()
            .map_err(|e| MetaError::ReadFailed(format!("Failed to stat log: {}", e)))?
            .len();

        Ok(Self {
            reader: BufReader::new(file),
            current_offset: 0,
            file_size,
        })
    }

    /// Read the next entry, validating its checksum.
    ///
    /// Returns `Ok(None)` at end of file.
    pub fn read_next(&mut self) -> MetaResult<Option<LogEntry>> {
        if self.current_offset >= self.file_size {
            return Ok(None);
        }

        let remaining = self.file_size - self.current_offset;
        if remaining < MIN_ENTRY_SIZE {
            return Err(MetaError::Corruption {
                offset: self.current_offset,
                reason: format!(
                    "Truncated log: {} bytes remaining, minimum entry size is {}",
                    remaining, MIN_ENTRY_SIZE
                ),
            });
        }

        let mut len_buf = [0u8; 4];
        self.reader
            .read_exact(&mut len_buf)
            .map_err(|e| MetaError::Corruption {
                offset: self.current_offset,
                reason: format!("Failed to read entry length: {}", e),
            })?;
        let entry_length = u32::from_le_bytes(len_buf) as u64;

        if entry_length < MIN_ENTRY_SIZE || entry_length > remaining {
            return Err(MetaError::Corruption {
                offset: self.current_offset,
                reason: format!("Invalid entry length: {}", entry_length),
            });
        }

        let mut entry_buf = vec![0u8; entry_length as usize];
        entry_buf[0..4].copy_from_slice(&len_buf);
        self.reader
            .read_exact(&mut entry_buf[4..])
            .map_err(|e| MetaError::Corruption {
                offset: self.current_offset,
                reason: format!("Failed to read entry body: {}", e),
            })?;

        let (entry, consumed) = decode_entry(&entry_buf).map_err(|e| MetaError::Corruption {
            offset: self.current_offset,
            reason: e.to_string(),
        })?;

        self.current_offset += consumed as u64;
        Ok(Some(entry))
    }
}

/// Result of replaying the log
pub struct ReplaySummary {
    /// Live records, latest entry per token, tombstones removed
    pub records: HashMap<String, Record>,
    /// Total entries scanned (live + superseded + tombstones)
    pub total_entries: usize,
}

/// Replay the log into the live record map. A missing file is an empty log.
pub fn replay(path: &Path) -> MetaResult<ReplaySummary> {
    let mut records = HashMap::new();
    let mut total_entries = 0;

    if !path.exists() {
        return Ok(ReplaySummary {
            records,
            total_entries,
        });
    }

    let mut reader = LogReader::open(path)?;
    while let Some(entry) = reader.read_next()? {
        total_entries += 1;
        match entry {
            LogEntry::Record(record) => {
                records.insert(record.token.clone(), record);
            }
            LogEntry::Tombstone(token) => {
                records.remove(&token);
            }
        }
    }

    Ok(ReplaySummary {
        records,
        total_entries,
    })
}

/// Rewrite the log to contain exactly the given live records.
///
/// Writes to a sibling temp file, fsyncs, then renames into place.
pub fn rewrite(path: &Path, records: &HashMap<String, Record>) -> MetaResult<()> {
    let tmp_path = path.with_extension("dat.compact");

    {
        let mut tmp = File::create(&tmp_path).map_err(|e| {
            MetaError::WriteFailed(format!("Failed to create {}: {}", tmp_path.display(), e))
        })?;

        for record in records.values() {
            let encoded = encode_entry(&LogEntry::Record(record.clone()));
            tmp.write_all(&encoded)
                .map_err(|e| MetaError::WriteFailed(format!("Compaction write failed: {}", e)))?;
        }

        tmp.sync_all()
            .map_err(|e| MetaError::WriteFailed(format!("Compaction fsync failed: {}", e)))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| MetaError::WriteFailed(format!("Compaction rename failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Value;
    use tempfile::TempDir;

    fn sample_record(token: &str) -> Record {
        let now = Utc.timestamp_millis_opt(1754300000000).unwrap();
        Record {
            token: token.to_string(),
            payload: Payload::Inline(b"body".to_vec()),
            display_name: None,
            size: 4,
            checksum: Record::checksum_of(b"body"),
            created_at: now,
            expires_at: now + Duration::seconds(60),
            max_reads: 0,
            read_count: 0,
            flags: Value::Null,
        }
    }

    #[test]
    fn test_append_and_replay() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");

        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&LogEntry::Record(sample_record("AAA111"))).unwrap();
            writer.append(&LogEntry::Record(sample_record("BBB222"))).unwrap();
        }

        let summary = replay(&path).unwrap();
        assert_eq!(summary.total_entries, 2);
        assert_eq!(summary.records.len(), 2);
        assert!(summary.records.contains_key("AAA111"));
    }

    #[test]
    fn test_latest_entry_wins() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");

        let mut updated = sample_record("AAA111");
        updated.read_count = 3;

        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&LogEntry::Record(sample_record("AAA111"))).unwrap();
            writer.append(&LogEntry::Record(updated.clone())).unwrap();
        }

        let summary = replay(&path).unwrap();
        assert_eq!(summary.records.get("AAA111").unwrap().read_count, 3);
    }

    #[test]
    fn test_tombstone_removes_on_replay() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");

        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&LogEntry::Record(sample_record("AAA111"))).unwrap();
            writer.append(&LogEntry::Tombstone("AAA111".to_string())).unwrap();
        }

        let summary = replay(&path).unwrap();
        assert_eq!(summary.total_entries, 2);
        assert!(summary.records.is_empty());
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let summary = replay(&temp.path().join("absent.dat")).unwrap();
        assert_eq!(summary.total_entries, 0);
        assert!(summary.records.is_empty());
    }

    #[test]
    fn test_corruption_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");

        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&LogEntry::Record(sample_record("AAA111"))).unwrap();
        }

        {
            use std::io::{Seek, SeekFrom};
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(12)).unwrap();
            file.write_all(&[0xFF]).unwrap();
        }

        let result = replay(&path);
        assert!(matches!(result, Err(MetaError::Corruption { .. })));
    }

    #[test]
    fn test_rewrite_drops_dead_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");

        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&LogEntry::Record(sample_record("AAA111"))).unwrap();
            writer.append(&LogEntry::Record(sample_record("BBB222"))).unwrap();
            writer.append(&LogEntry::Tombstone("BBB222".to_string())).unwrap();
        }

        let before = replay(&path).unwrap();
        assert_eq!(before.total_entries, 3);

        rewrite(&path, &before.records).unwrap();

        let after = replay(&path).unwrap();
        assert_eq!(after.total_entries, 1);
        assert!(after.records.contains_key("AAA111"));
    }

    #[test]
    fn test_writer_reopens_at_end() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");

        let first_end;
        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&LogEntry::Record(sample_record("AAA111"))).unwrap();
            first_end = writer.current_offset();
        }

        let writer = LogWriter::open(&path).unwrap();
        assert_eq!(writer.current_offset(), first_end);
    }
}
