//! # Content Store
//!
//! The orchestration engine: create, redeem, sweep. Everything else in the
//! crate exists to serve these three operations.
//!
//! State model per record: `Live -> {ReadExhausted, Expired} -> Deleted`.
//! `Deleted` is terminal; there is no resurrection.
//!
//! ## Invariants
//! - Blob bytes are written before the record is indexed; a create that
//!   fails after the blob write deletes the blob before surfacing the error
//! - The liveness check and the read-count increment are one atomic unit
//!   against the metadata store: with `max_reads = N`, at most N redeems
//!   ever succeed, under any concurrency
//! - Exactly one caller performs the lazy delete of a dead record; all
//!   concurrent and later callers observe absence
//! - A sweep never aborts on a single record's failure

pub mod errors;
pub mod gc;

pub use errors::{StoreError, StoreResult};
pub use gc::GcScheduler;

use std::fs;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::blob::{BlobRef, BlobStore};
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::meta::{Consume, MetaStore, SettingsStore};
use crate::observability::Logger;
use crate::record::{Payload, Record, RecordKind};
use crate::token::{TokenGenerator, TokenStyle};

/// Per-create parameters
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Seconds until expiry; must be positive, clamped to the configured max
    pub ttl_seconds: i64,
    /// Read budget; 0 means unlimited, clamped to the configured max
    pub max_reads: u32,
    /// Token shape handed back to the producer
    pub token_style: TokenStyle,
    /// Opaque pass-through metadata, returned verbatim at redeem
    pub flags: Value,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            ttl_seconds: 86400,
            max_reads: 0,
            token_style: TokenStyle::PickupCode,
            flags: Value::Null,
        }
    }
}

/// Content handed back by a successful redeem
#[derive(Debug)]
pub enum RedeemedContent {
    /// Inline bytes, ready to serve
    Inline(Vec<u8>),
    /// Blob handle; stream it via [`BlobStore::open_blob`] or
    /// [`BlobStore::read_range`]
    Blob(BlobRef),
}

/// A granted read and the metadata the transport layer needs
#[derive(Debug)]
pub struct Redeemed {
    pub content: RedeemedContent,
    pub display_name: Option<String>,
    pub size: u64,
    /// SHA-256 hex of the content
    pub checksum: String,
    /// Read count after this redeem
    pub read_count: u32,
    pub max_reads: u32,
    pub expires_at: DateTime<Utc>,
    pub flags: Value,
}

struct StoreInner {
    config: StoreConfig,
    meta: MetaStore,
    blobs: BlobStore,
    gc: GcScheduler,
    tokens: TokenGenerator,
    clock: Arc<dyn Clock>,
}

/// The ephemeral content store engine
#[derive(Clone)]
pub struct ContentStore {
    inner: Arc<StoreInner>,
}

impl ContentStore {
    /// Open a store on the wall clock
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open a store with an explicit time source
    pub fn open_with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        config.validate().map_err(StoreError::Validation)?;

        fs::create_dir_all(config.data_path())
            .map_err(|e| StoreError::Persistence(format!("Failed to create data dir: {}", e)))?;

        let meta = MetaStore::open(
            &config.meta_path(),
            StdDuration::from_millis(config.lock_timeout_ms),
        )?;
        let blobs = BlobStore::open(config.blob_path())?;
        let settings = Arc::new(SettingsStore::open(&config.meta_path().join("settings.json"))?);

        let gc = GcScheduler::new(settings, config.sweep_interval_seconds);
        gc.initialize(clock.now())?;

        let tokens = TokenGenerator::new(&config.code_alphabet, config.code_length);

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                meta,
                blobs,
                gc,
                tokens,
                clock,
            }),
        })
    }

    /// The blob store, for streaming blob content at the transport boundary
    pub fn blobs(&self) -> &BlobStore {
        &self.inner.blobs
    }

    /// The active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The persisted last sweep time (unix seconds)
    pub fn last_sweep_at(&self) -> StoreResult<Option<i64>> {
        Ok(self.inner.gc.last_sweep_at()?)
    }

    /// Deposit inline text; returns the pickup token.
    pub fn create_text(
        &self,
        content: impl Into<Vec<u8>>,
        opts: CreateOptions,
    ) -> StoreResult<String> {
        let content = content.into();
        let (ttl_seconds, max_reads) = self.clamp(&opts)?;

        let size = content.len() as u64;
        let checksum = Record::checksum_of(&content);
        let token = self.index_record(
            Payload::Inline(content),
            None,
            size,
            checksum,
            ttl_seconds,
            max_reads,
            &opts,
        )?;

        Logger::info(
            "RECORD_CREATED",
            &[
                ("kind", "inline"),
                ("ttl_seconds", &ttl_seconds.to_string()),
                ("max_reads", &max_reads.to_string()),
            ],
        );
        self.maybe_sweep();
        Ok(token)
    }

    /// Stream a blob in; returns the pickup token.
    ///
    /// The blob is written before the record is indexed. If indexing fails
    /// for any reason (token space, persistence, an unwind), the written
    /// blob is deleted before the error reaches the caller.
    pub fn create_blob<R: Read>(
        &self,
        reader: &mut R,
        display_name: Option<String>,
        opts: CreateOptions,
    ) -> StoreResult<String> {
        // Reject bad parameters before touching the medium
        let (ttl_seconds, max_reads) = self.clamp(&opts)?;

        let outcome = self.inner.blobs.put(reader)?;
        let mut guard = BlobGuard {
            blobs: &self.inner.blobs,
            blob_ref: Some(outcome.blob_ref.clone()),
        };

        let token = self.index_record(
            Payload::Blob(outcome.blob_ref),
            display_name,
            outcome.size,
            outcome.checksum,
            ttl_seconds,
            max_reads,
            &opts,
        )?;
        guard.defuse();

        Logger::info(
            "RECORD_CREATED",
            &[
                ("kind", "blob"),
                ("size", &outcome.size.to_string()),
                ("ttl_seconds", &ttl_seconds.to_string()),
                ("max_reads", &max_reads.to_string()),
            ],
        );
        self.maybe_sweep();
        Ok(token)
    }

    /// Redeem a token: exactly-once-per-budget content retrieval.
    pub fn redeem(&self, token: &str) -> StoreResult<Redeemed> {
        let now = self.inner.clock.now();

        let result = match self.inner.meta.consume(token, now)? {
            Consume::Absent => Err(StoreError::NotFoundOrExpired),
            Consume::Dead(record) => {
                // This caller won the lazy delete; the blob is its to clean.
                if let Some(blob_ref) = record.blob_ref() {
                    if let Err(e) = self.inner.blobs.delete(blob_ref) {
                        Logger::warn(
                            "BLOB_DELETE_FAILED",
                            &[("blob", blob_ref.as_str()), ("error", &e.to_string())],
                        );
                    }
                }
                Logger::info("RECORD_DEAD", &[("kind", kind_str(record.kind()))]);
                Err(StoreError::NotFoundOrExpired)
            }
            Consume::Live(record) => {
                let Record {
                    payload,
                    display_name,
                    size,
                    checksum,
                    max_reads,
                    read_count,
                    expires_at,
                    flags,
                    ..
                } = record;

                Ok(Redeemed {
                    content: match payload {
                        Payload::Inline(bytes) => RedeemedContent::Inline(bytes),
                        Payload::Blob(blob_ref) => RedeemedContent::Blob(blob_ref),
                    },
                    display_name,
                    size,
                    checksum,
                    read_count,
                    max_reads,
                    expires_at,
                    flags,
                })
            }
        };

        self.maybe_sweep();
        result
    }

    /// Delete every dead record and its blob. Returns records deleted.
    ///
    /// Per-record failures are logged, counted, and skipped; the offending
    /// record stays whole for the next sweep. Also collects orphaned blobs
    /// past the grace age and prunes empty shard directories.
    pub fn sweep(&self) -> StoreResult<usize> {
        let now = self.inner.clock.now();

        let candidates = self.inner.meta.dead_candidates(now)?;
        let mut deleted = 0usize;
        let mut failed = 0usize;

        for token in candidates {
            let record = match self.inner.meta.get(&token)? {
                Some(record) => record,
                // A concurrent redeem already removed it
                None => continue,
            };
            if !record.is_dead(now) {
                continue;
            }

            // Blob first; metadata only goes once the blob delete was
            // attempted. A missing blob is fine, an I/O failure is not.
            if let Some(blob_ref) = record.blob_ref() {
                if let Err(e) = self.inner.blobs.delete(blob_ref) {
                    Logger::warn(
                        "BLOB_DELETE_FAILED",
                        &[("blob", blob_ref.as_str()), ("error", &e.to_string())],
                    );
                    failed += 1;
                    continue;
                }
            }

            if self.inner.meta.remove_if_dead(&token, now)?.is_some() {
                deleted += 1;
            }
        }

        let orphans = self.collect_orphans(now);

        if let Err(e) = self.inner.blobs.clean_empty_dirs() {
            Logger::warn("EMPTY_DIR_CLEANUP_FAILED", &[("error", &e.to_string())]);
        }

        Logger::info(
            "SWEEP_COMPLETED",
            &[
                ("deleted", &deleted.to_string()),
                ("failed", &failed.to_string()),
                ("orphans_removed", &orphans.to_string()),
            ],
        );

        Ok(deleted)
    }

    /// Remove blob files no live record references, once past the grace age.
    ///
    /// The grace period protects an in-flight create that has written its
    /// blob but not yet indexed the record. Listing happens before the
    /// live-ref snapshot, so a create completing in between is seen as live.
    fn collect_orphans(&self, now: DateTime<Utc>) -> usize {
        let listed = match self.inner.blobs.list() {
            Ok(listed) => listed,
            Err(e) => {
                Logger::warn("ORPHAN_SCAN_FAILED", &[("error", &e.to_string())]);
                return 0;
            }
        };
        let live = match self.inner.meta.live_blob_refs() {
            Ok(live) => live,
            Err(e) => {
                Logger::warn("ORPHAN_SCAN_FAILED", &[("error", &e.to_string())]);
                return 0;
            }
        };

        let grace = Duration::seconds(self.inner.config.orphan_grace_seconds);
        let mut removed = 0usize;

        for (blob_ref, modified) in listed {
            if live.contains(blob_ref.as_str()) {
                continue;
            }
            let modified: DateTime<Utc> = modified.into();
            if now.signed_duration_since(modified) < grace {
                continue;
            }
            match self.inner.blobs.delete(&blob_ref) {
                Ok(()) => {
                    Logger::info("ORPHAN_BLOB_REMOVED", &[("blob", blob_ref.as_str())]);
                    removed += 1;
                }
                Err(e) => Logger::warn(
                    "BLOB_DELETE_FAILED",
                    &[("blob", blob_ref.as_str()), ("error", &e.to_string())],
                ),
            }
        }

        removed
    }

    fn clamp(&self, opts: &CreateOptions) -> StoreResult<(i64, u32)> {
        if opts.ttl_seconds <= 0 {
            return Err(StoreError::Validation(
                "ttl_seconds must be > 0".to_string(),
            ));
        }
        let ttl_seconds = opts.ttl_seconds.min(self.inner.config.max_ttl_seconds);
        let max_reads = opts.max_reads.min(self.inner.config.max_read_limit);
        Ok((ttl_seconds, max_reads))
    }

    /// Allocate a token and persist the record, retrying on conflicts.
    fn index_record(
        &self,
        payload: Payload,
        display_name: Option<String>,
        size: u64,
        checksum: String,
        ttl_seconds: i64,
        max_reads: u32,
        opts: &CreateOptions,
    ) -> StoreResult<String> {
        let now = self.inner.clock.now();
        let mut record = Record {
            token: String::new(),
            payload,
            display_name,
            size,
            checksum,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
            max_reads,
            read_count: 0,
            flags: opts.flags.clone(),
        };

        for _ in 0..self.inner.config.token_retry_limit {
            record.token = self.inner.tokens.generate(opts.token_style);
            if self.inner.meta.insert_new(&record)? {
                return Ok(record.token);
            }
        }

        Err(StoreError::TokenSpaceExhausted(
            self.inner.config.token_retry_limit,
        ))
    }

    /// Fire a sweep on its own thread if one is due. Never blocks the
    /// calling operation on unrelated records.
    fn maybe_sweep(&self) {
        let now = self.inner.clock.now();
        match self.inner.gc.try_begin(now) {
            Ok(true) => {
                let store = self.clone();
                std::thread::spawn(move || {
                    if let Err(e) = store.sweep() {
                        Logger::error("SWEEP_FAILED", &[("error", &e.to_string())]);
                    }
                });
            }
            Ok(false) => {}
            Err(e) => Logger::warn("SWEEP_SCHEDULE_FAILED", &[("error", &e.to_string())]),
        }
    }
}

fn kind_str(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Inline => "inline",
        RecordKind::Blob => "blob",
    }
}

/// Deletes the written blob unless defused; covers every failure path
/// between the blob write and the record becoming indexed, unwinds included.
struct BlobGuard<'a> {
    blobs: &'a BlobStore,
    blob_ref: Option<BlobRef>,
}

impl BlobGuard<'_> {
    fn defuse(&mut self) {
        self.blob_ref = None;
    }
}

impl Drop for BlobGuard<'_> {
    fn drop(&mut self) {
        if let Some(blob_ref) = self.blob_ref.take() {
            if let Err(e) = self.blobs.delete(&blob_ref) {
                Logger::warn(
                    "BLOB_DELETE_FAILED",
                    &[("blob", blob_ref.as_str()), ("error", &e.to_string())],
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (ContentStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::with_data_dir(temp.path().to_string_lossy());
        let store = ContentStore::open(config).unwrap();
        (store, temp)
    }

    #[test]
    fn test_create_and_redeem_text() {
        let (store, _temp) = create_test_store();

        let token = store
            .create_text("hello", CreateOptions::default())
            .unwrap();
        assert_eq!(token.len(), 6);

        let redeemed = store.redeem(&token).unwrap();
        match redeemed.content {
            RedeemedContent::Inline(bytes) => assert_eq!(bytes, b"hello"),
            RedeemedContent::Blob(_) => panic!("expected inline content"),
        }
        assert_eq!(redeemed.read_count, 1);
        assert_eq!(redeemed.size, 5);
        assert_eq!(redeemed.checksum, Record::checksum_of(b"hello"));
    }

    #[test]
    fn test_unknown_token_is_absent() {
        let (store, _temp) = create_test_store();

        assert!(matches!(
            store.redeem("NOSUCH"),
            Err(StoreError::NotFoundOrExpired)
        ));
    }

    #[test]
    fn test_zero_ttl_rejected_before_write() {
        let (store, _temp) = create_test_store();

        let opts = CreateOptions {
            ttl_seconds: 0,
            ..Default::default()
        };
        assert!(matches!(
            store.create_text("x", opts),
            Err(StoreError::Validation(_))
        ));

        // Nothing was indexed
        let opts = CreateOptions {
            ttl_seconds: -5,
            ..Default::default()
        };
        let mut reader = &b"x"[..];
        assert!(matches!(
            store.create_blob(&mut reader, None, opts),
            Err(StoreError::Validation(_))
        ));
        assert!(store.blobs().list().unwrap().is_empty());
    }

    #[test]
    fn test_ttl_and_reads_clamped() {
        let (store, _temp) = create_test_store();
        let created = Utc::now();

        let opts = CreateOptions {
            ttl_seconds: i64::MAX,
            max_reads: u32::MAX,
            ..Default::default()
        };
        let token = store.create_text("clamped", opts).unwrap();
        let redeemed = store.redeem(&token).unwrap();

        assert_eq!(redeemed.max_reads, store.config().max_read_limit);
        let max_expiry = created + Duration::seconds(store.config().max_ttl_seconds + 60);
        assert!(redeemed.expires_at < max_expiry);
    }

    #[test]
    fn test_long_token_style() {
        let (store, _temp) = create_test_store();

        let opts = CreateOptions {
            token_style: TokenStyle::LongId,
            ..Default::default()
        };
        let token = store.create_text("uuid please", opts).unwrap();

        assert_eq!(token.len(), 36);
        assert!(store.redeem(&token).is_ok());
    }

    #[test]
    fn test_flags_pass_through() {
        let (store, _temp) = create_test_store();

        let opts = CreateOptions {
            flags: serde_json::json!({"is_markdown": true, "is_encrypted": false}),
            ..Default::default()
        };
        let token = store.create_text("# title", opts).unwrap();

        let redeemed = store.redeem(&token).unwrap();
        assert_eq!(redeemed.flags["is_markdown"], true);
        assert_eq!(redeemed.flags["is_encrypted"], false);
    }

    #[test]
    fn test_blob_roundtrip_and_lazy_delete() {
        let (store, _temp) = create_test_store();

        let opts = CreateOptions {
            max_reads: 1,
            ..Default::default()
        };
        let mut reader = &b"attachment bytes"[..];
        let token = store
            .create_blob(&mut reader, Some("notes.txt".to_string()), opts)
            .unwrap();

        let redeemed = store.redeem(&token).unwrap();
        assert_eq!(redeemed.display_name.as_deref(), Some("notes.txt"));
        let blob_ref = match redeemed.content {
            RedeemedContent::Blob(blob_ref) => blob_ref,
            RedeemedContent::Inline(_) => panic!("expected blob content"),
        };
        assert_eq!(store.blobs().read(&blob_ref).unwrap(), b"attachment bytes");

        // Budget spent: the next redeem lazily deletes record and blob
        assert!(matches!(
            store.redeem(&token),
            Err(StoreError::NotFoundOrExpired)
        ));
        assert!(store.blobs().read(&blob_ref).is_err());
    }

    #[test]
    fn test_token_space_exhausted_rolls_back_blob() {
        let temp = TempDir::new().unwrap();
        let mut config = StoreConfig::with_data_dir(temp.path().to_string_lossy());
        // Two-character alphabet of one repeated symbol: every code is "0000"
        config.code_alphabet = "00".to_string();
        config.code_length = 4;
        let store = ContentStore::open(config).unwrap();

        let first = store
            .create_text("first", CreateOptions::default())
            .unwrap();
        assert_eq!(first, "0000");

        // The only token is taken; inline create fails...
        assert!(matches!(
            store.create_text("second", CreateOptions::default()),
            Err(StoreError::TokenSpaceExhausted(5))
        ));

        // ...and a blob create fails AND leaves no blob behind
        let mut reader = &b"doomed"[..];
        assert!(matches!(
            store.create_blob(&mut reader, None, CreateOptions::default()),
            Err(StoreError::TokenSpaceExhausted(5))
        ));
        assert!(store.blobs().list().unwrap().is_empty());
    }

    #[test]
    fn test_store_reopens_with_records() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::with_data_dir(temp.path().to_string_lossy());

        let token = {
            let store = ContentStore::open(config.clone()).unwrap();
            store
                .create_text("durable", CreateOptions::default())
                .unwrap()
        };

        let store = ContentStore::open(config).unwrap();
        let redeemed = store.redeem(&token).unwrap();
        match redeemed.content {
            RedeemedContent::Inline(bytes) => assert_eq!(bytes, b"durable"),
            RedeemedContent::Blob(_) => panic!("expected inline content"),
        }
    }
}
