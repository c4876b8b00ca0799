//! # Record Model
//!
//! The persisted metadata unit for one shareable item. Inline text and
//! uploaded blobs share a single tagged-variant type, so the expiry and
//! consumption rules exist exactly once.
//!
//! # Liveness
//!
//! One boundary rule, applied at every call site:
//! a record is dead iff `now > expires_at` (it is still redeemable at
//! exactly `expires_at`) OR `max_reads != 0 && read_count >= max_reads`.

mod codec;

pub use codec::{decode_entry, encode_entry, LogEntry};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::blob::BlobRef;

/// Discriminant for the two content shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Content bytes live directly in the record
    Inline,
    /// Content lives in the blob store; the record holds the handle
    Blob,
}

/// Where the content of a record lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Inline(Vec<u8>),
    Blob(BlobRef),
}

/// Persisted metadata (+ possibly inline content) for one shareable item
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Unique lookup key; immutable after creation
    pub token: String,
    pub payload: Payload,
    /// Original filename (blob kind only)
    pub display_name: Option<String>,
    /// Content length in bytes, denormalized to avoid a filesystem hit
    pub size: u64,
    /// SHA-256 hex of the content, computed at create
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 0 means unlimited
    pub max_reads: u32,
    pub read_count: u32,
    /// Opaque pass-through metadata; stored and returned, never interpreted
    pub flags: Value,
}

impl Record {
    /// Content shape discriminant
    pub fn kind(&self) -> RecordKind {
        match self.payload {
            Payload::Inline(_) => RecordKind::Inline,
            Payload::Blob(_) => RecordKind::Blob,
        }
    }

    /// The blob handle, if this is a blob-kind record
    pub fn blob_ref(&self) -> Option<&BlobRef> {
        match &self.payload {
            Payload::Blob(blob_ref) => Some(blob_ref),
            Payload::Inline(_) => None,
        }
    }

    /// Whether the absolute deadline has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the read budget is spent
    pub fn is_exhausted(&self) -> bool {
        self.max_reads != 0 && self.read_count >= self.max_reads
    }

    /// Whether the record is logically dead (even if not yet deleted)
    pub fn is_dead(&self, now: DateTime<Utc>) -> bool {
        self.is_expired(now) || self.is_exhausted()
    }

    /// SHA-256 hex digest of content bytes
    pub fn checksum_of(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_record(max_reads: u32, read_count: u32) -> Record {
        let now = Utc::now();
        Record {
            token: "ABC123".to_string(),
            payload: Payload::Inline(b"hello".to_vec()),
            display_name: None,
            size: 5,
            checksum: Record::checksum_of(b"hello"),
            created_at: now,
            expires_at: now + Duration::seconds(3600),
            max_reads,
            read_count,
            flags: Value::Null,
        }
    }

    #[test]
    fn test_kind_follows_payload() {
        let inline = sample_record(0, 0);
        assert_eq!(inline.kind(), RecordKind::Inline);
        assert!(inline.blob_ref().is_none());

        let mut blob = sample_record(0, 0);
        blob.payload = Payload::Blob(BlobRef::from("ab/abcd".to_string()));
        assert_eq!(blob.kind(), RecordKind::Blob);
        assert_eq!(blob.blob_ref().unwrap().as_str(), "ab/abcd");
    }

    #[test]
    fn test_alive_at_exact_deadline() {
        let record = sample_record(0, 0);

        assert!(!record.is_expired(record.expires_at));
        assert!(record.is_expired(record.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn test_exhaustion_rule() {
        assert!(!sample_record(0, 1000).is_exhausted()); // 0 = unlimited
        assert!(!sample_record(3, 2).is_exhausted());
        assert!(sample_record(3, 3).is_exhausted());
        assert!(sample_record(3, 4).is_exhausted());
    }

    #[test]
    fn test_dead_by_either_rule() {
        let now = Utc::now();

        let exhausted = sample_record(1, 1);
        assert!(exhausted.is_dead(now));

        let expired = sample_record(0, 0);
        assert!(expired.is_dead(expired.expires_at + Duration::seconds(1)));

        let live = sample_record(2, 1);
        assert!(!live.is_dead(now));
    }

    #[test]
    fn test_checksum_of() {
        let checksum = Record::checksum_of(b"test");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, Record::checksum_of(b"test"));
        assert_ne!(checksum, Record::checksum_of(b"test!"));
    }
}
