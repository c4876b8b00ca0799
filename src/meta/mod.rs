//! # Metadata Store
//!
//! The embedded persistence layer for records, and the store's sole
//! synchronization point. One mutex guards the append-only log writer and
//! the in-memory indexes together, so a liveness check and the write that
//! depends on it always execute as a single atomic unit. Calling code never
//! does a separate read followed by a separate write.
//!
//! Indexes kept beside the primary token map:
//! - an expiry-ordered set, so sweeps find time-dead records without a scan
//! - the set of read-exhausted tokens awaiting physical deletion
//!
//! ## Invariants
//! - A record is reachable only by exact token match
//! - Every mutation is appended (and fsynced) before it is visible in memory
//! - Tombstoned tokens never resurface, in memory or across restarts

pub mod errors;
mod log;
pub mod settings;

pub use errors::{MetaError, MetaResult};
pub use settings::{SettingsStore, LAST_SWEEP_AT};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::observability::Logger;
use crate::record::{LogEntry, Record};

use log::LogWriter;

const LOG_FILE: &str = "records.dat";

/// Compaction at open requires at least this many dead entries
const COMPACT_MIN_DEAD: usize = 64;

/// Outcome of an atomic consume attempt
#[derive(Debug)]
pub enum Consume {
    /// No record under this token
    Absent,
    /// The record was found dead; this caller removed it and owns cleanup
    /// of its blob. Concurrent callers observe `Absent`.
    Dead(Record),
    /// The read was granted; the returned record carries the incremented
    /// read count.
    Live(Record),
}

struct MetaInner {
    writer: LogWriter,
    records: HashMap<String, Record>,
    by_expiry: BTreeSet<(i64, String)>,
    exhausted: HashSet<String>,
}

impl MetaInner {
    /// Tombstone and unindex a record. The tombstone is durable before the
    /// record disappears from memory.
    fn remove_entry(&mut self, token: &str) -> MetaResult<Option<Record>> {
        if !self.records.contains_key(token) {
            return Ok(None);
        }

        self.writer.append(&LogEntry::Tombstone(token.to_string()))?;

        let record = match self.records.remove(token) {
            Some(record) => record,
            None => return Ok(None),
        };
        self.by_expiry
            .remove(&(record.expires_at.timestamp_millis(), record.token.clone()));
        self.exhausted.remove(token);

        Ok(Some(record))
    }
}

/// Persistent record table with atomic consumption
pub struct MetaStore {
    inner: Mutex<MetaInner>,
    lock_timeout: Duration,
}

impl MetaStore {
    /// Open the store under the given metadata directory.
    ///
    /// Replays the record log into memory, compacting it first when dead
    /// entries dominate (an ephemeral workload is mostly deletions, so the
    /// log would otherwise grow without bound).
    pub fn open(dir: &Path, lock_timeout: Duration) -> MetaResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            MetaError::WriteFailed(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(LOG_FILE);
        let summary = log::replay(&path)?;

        let live = summary.records.len();
        let dead = summary.total_entries - live;
        if dead >= COMPACT_MIN_DEAD && dead > live {
            log::rewrite(&path, &summary.records)?;
            Logger::info(
                "LOG_COMPACTED",
                &[
                    ("dropped_entries", &dead.to_string()),
                    ("live_records", &live.to_string()),
                ],
            );
        }

        let writer = LogWriter::open(&path)?;

        let mut by_expiry = BTreeSet::new();
        let mut exhausted = HashSet::new();
        for record in summary.records.values() {
            by_expiry.insert((record.expires_at.timestamp_millis(), record.token.clone()));
            if record.is_exhausted() {
                exhausted.insert(record.token.clone());
            }
        }

        Ok(Self {
            inner: Mutex::new(MetaInner {
                writer,
                records: summary.records,
                by_expiry,
                exhausted,
            }),
            lock_timeout,
        })
    }

    /// Bounded lock acquisition. A store wedged behind a stuck operation
    /// surfaces a retryable timeout instead of hanging the caller.
    fn lock(&self) -> MetaResult<MutexGuard<'_, MetaInner>> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => return Err(MetaError::LockPoisoned),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(MetaError::LockTimeout(self.lock_timeout.as_millis() as u64));
                    }
                    std::thread::sleep(Duration::from_micros(200));
                }
            }
        }
    }

    /// Insert a record under a token that must not already exist.
    ///
    /// Returns `false` on a token conflict so the caller can regenerate.
    pub fn insert_new(&self, record: &Record) -> MetaResult<bool> {
        let mut inner = self.lock()?;

        if inner.records.contains_key(&record.token) {
            return Ok(false);
        }

        inner.writer.append(&LogEntry::Record(record.clone()))?;
        inner
            .by_expiry
            .insert((record.expires_at.timestamp_millis(), record.token.clone()));
        if record.is_exhausted() {
            inner.exhausted.insert(record.token.clone());
        }
        inner.records.insert(record.token.clone(), record.clone());

        Ok(true)
    }

    /// Atomically check liveness and either grant a read or remove a dead
    /// record. This is the increment-and-check primitive: with
    /// `max_reads = N`, at most N calls ever observe `Live` regardless of
    /// concurrency, and exactly one caller observes `Dead` per record.
    pub fn consume(&self, token: &str, now: DateTime<Utc>) -> MetaResult<Consume> {
        let mut inner = self.lock()?;

        let record = match inner.records.get(token) {
            None => return Ok(Consume::Absent),
            Some(record) => record.clone(),
        };

        if record.is_dead(now) {
            return Ok(match inner.remove_entry(token)? {
                Some(removed) => Consume::Dead(removed),
                None => Consume::Absent,
            });
        }

        let mut updated = record;
        updated.read_count += 1;
        inner.writer.append(&LogEntry::Record(updated.clone()))?;
        if updated.is_exhausted() {
            inner.exhausted.insert(updated.token.clone());
        }
        inner.records.insert(updated.token.clone(), updated.clone());

        Ok(Consume::Live(updated))
    }

    /// Remove a record if (still) dead. Re-checks liveness under the lock,
    /// since a concurrent consume may have already removed it.
    pub fn remove_if_dead(&self, token: &str, now: DateTime<Utc>) -> MetaResult<Option<Record>> {
        let mut inner = self.lock()?;

        match inner.records.get(token) {
            Some(record) if record.is_dead(now) => inner.remove_entry(token),
            _ => Ok(None),
        }
    }

    /// Snapshot of a record by token
    pub fn get(&self, token: &str) -> MetaResult<Option<Record>> {
        let inner = self.lock()?;
        Ok(inner.records.get(token).cloned())
    }

    /// Tokens of records that are dead as of `now`: expiry-index range scan
    /// plus the exhausted set.
    pub fn dead_candidates(&self, now: DateTime<Utc>) -> MetaResult<Vec<String>> {
        let inner = self.lock()?;
        let now_ms = now.timestamp_millis();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for (_, token) in inner.by_expiry.range(..(now_ms, String::new())) {
            if seen.insert(token.clone()) {
                candidates.push(token.clone());
            }
        }
        for token in &inner.exhausted {
            if seen.insert(token.clone()) {
                candidates.push(token.clone());
            }
        }

        Ok(candidates)
    }

    /// Blob paths referenced by live records (for the orphan scan)
    pub fn live_blob_refs(&self) -> MetaResult<HashSet<String>> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .values()
            .filter_map(|r| r.blob_ref().map(|b| b.as_str().to_string()))
            .collect())
    }

    /// Number of live records
    pub fn len(&self) -> MetaResult<usize> {
        let inner = self.lock()?;
        Ok(inner.records.len())
    }

    /// Whether the store holds no live records
    pub fn is_empty(&self) -> MetaResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;
    use tempfile::TempDir;

    fn lock_timeout() -> Duration {
        Duration::from_millis(5000)
    }

    fn sample_record(token: &str, now: DateTime<Utc>, ttl_seconds: i64, max_reads: u32) -> Record {
        Record {
            token: token.to_string(),
            payload: Payload::Inline(b"body".to_vec()),
            display_name: None,
            size: 4,
            checksum: Record::checksum_of(b"body"),
            created_at: now,
            expires_at: now + ChronoDuration::seconds(ttl_seconds),
            max_reads,
            read_count: 0,
            flags: Value::Null,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let temp = TempDir::new().unwrap();
        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        let now = Utc::now();

        assert!(store.insert_new(&sample_record("AAA111", now, 60, 0)).unwrap());
        assert_eq!(store.len().unwrap(), 1);

        let record = store.get("AAA111").unwrap().unwrap();
        assert_eq!(record.read_count, 0);
        assert!(store.get("MISSING").unwrap().is_none());
    }

    #[test]
    fn test_insert_rejects_duplicate_token() {
        let temp = TempDir::new().unwrap();
        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        let now = Utc::now();

        assert!(store.insert_new(&sample_record("AAA111", now, 60, 0)).unwrap());
        assert!(!store.insert_new(&sample_record("AAA111", now, 60, 0)).unwrap());
    }

    #[test]
    fn test_consume_increments_and_persists() {
        let temp = TempDir::new().unwrap();
        let now = Utc::now();

        {
            let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
            store.insert_new(&sample_record("AAA111", now, 60, 0)).unwrap();

            match store.consume("AAA111", now).unwrap() {
                Consume::Live(record) => assert_eq!(record.read_count, 1),
                other => panic!("expected Live, got {:?}", other),
            }
        }

        // Increment survives reopen
        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        assert_eq!(store.get("AAA111").unwrap().unwrap().read_count, 1);
    }

    #[test]
    fn test_consume_dead_removes_exactly_once() {
        let temp = TempDir::new().unwrap();
        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        let now = Utc::now();

        store.insert_new(&sample_record("AAA111", now, 60, 1)).unwrap();

        // First consume spends the only read
        assert!(matches!(
            store.consume("AAA111", now).unwrap(),
            Consume::Live(_)
        ));

        // Second discovers the dead record and removes it
        assert!(matches!(
            store.consume("AAA111", now).unwrap(),
            Consume::Dead(_)
        ));

        // Third observes plain absence
        assert!(matches!(
            store.consume("AAA111", now).unwrap(),
            Consume::Absent
        ));
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_tombstone_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let now = Utc::now();

        {
            let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
            store.insert_new(&sample_record("AAA111", now, 60, 1)).unwrap();
            store.consume("AAA111", now).unwrap();
            store.consume("AAA111", now).unwrap(); // removes
        }

        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        assert!(store.get("AAA111").unwrap().is_none());
    }

    #[test]
    fn test_dead_candidates_by_expiry_and_exhaustion() {
        let temp = TempDir::new().unwrap();
        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        let now = Utc::now();

        store.insert_new(&sample_record("EXPIRD", now, 60, 0)).unwrap();
        store.insert_new(&sample_record("DRAIND", now, 3600, 1)).unwrap();
        store.insert_new(&sample_record("ALIVE0", now, 3600, 0)).unwrap();

        // Drain the limited record
        store.consume("DRAIND", now).unwrap();

        let later = now + ChronoDuration::seconds(61);
        let mut candidates = store.dead_candidates(later).unwrap();
        candidates.sort();

        assert_eq!(candidates, vec!["DRAIND".to_string(), "EXPIRD".to_string()]);
    }

    #[test]
    fn test_candidate_boundary_at_exact_expiry() {
        let temp = TempDir::new().unwrap();
        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        let now = Utc::now();

        store.insert_new(&sample_record("AAA111", now, 60, 0)).unwrap();

        let exact = now + ChronoDuration::seconds(60);
        assert!(store.dead_candidates(exact).unwrap().is_empty());

        let past = exact + ChronoDuration::milliseconds(1);
        assert_eq!(store.dead_candidates(past).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_if_dead_rechecks_liveness() {
        let temp = TempDir::new().unwrap();
        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        let now = Utc::now();

        store.insert_new(&sample_record("AAA111", now, 60, 0)).unwrap();

        // Still live: nothing removed
        assert!(store.remove_if_dead("AAA111", now).unwrap().is_none());

        // Expired: removed once, then gone
        let later = now + ChronoDuration::seconds(61);
        assert!(store.remove_if_dead("AAA111", later).unwrap().is_some());
        assert!(store.remove_if_dead("AAA111", later).unwrap().is_none());
    }

    #[test]
    fn test_live_blob_refs() {
        let temp = TempDir::new().unwrap();
        let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
        let now = Utc::now();

        let mut blob_record = sample_record("BLOB01", now, 60, 0);
        blob_record.payload = Payload::Blob(crate::blob::BlobRef::from("ab/abcd".to_string()));
        store.insert_new(&blob_record).unwrap();
        store.insert_new(&sample_record("TEXT01", now, 60, 0)).unwrap();

        let refs = store.live_blob_refs().unwrap();
        assert_eq!(refs.len(), 1);
        assert!(refs.contains("ab/abcd"));
    }

    #[test]
    fn test_compaction_at_open() {
        let temp = TempDir::new().unwrap();
        let now = Utc::now();

        {
            let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
            // 70 single-read records, each created, drained, and removed:
            // 3 log entries apiece, all dead after the loop
            for i in 0..70 {
                let token = format!("TOKEN{:02}", i);
                store.insert_new(&sample_record(&token, now, 60, 1)).unwrap();
                store.consume(&token, now).unwrap();
                store.consume(&token, now).unwrap();
            }
        }

        let size_before = fs::metadata(temp.path().join(LOG_FILE)).unwrap().len();

        {
            let store = MetaStore::open(temp.path(), lock_timeout()).unwrap();
            assert_eq!(store.len().unwrap(), 0);
        }

        let size_after = fs::metadata(temp.path().join(LOG_FILE)).unwrap().len();
        assert!(size_after < size_before);
        assert_eq!(size_after, 0);
    }
}
