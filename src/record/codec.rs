//! Record log entry format
//!
//! Each entry in the record log is framed as:
//!
//! ```text
//! +------------------+
//! | Entry Length     | (u32 LE, total including this field and checksum)
//! +------------------+
//! | Entry Tag        | (u8: 0 = record, 1 = tombstone)
//! +------------------+
//! | Token            | (length-prefixed string)
//! +------------------+
//! | Record Fields    | (record entries only, see below)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! Record fields: kind (u8), payload (length-prefixed bytes: inline content
//! or the blob path), display-name (presence flag + length-prefixed string),
//! size (u64 LE), content checksum (length-prefixed string), created-at and
//! expires-at (i64 LE unix millis), max-reads and read-count (u32 LE), flags
//! (length-prefixed JSON bytes).
//!
//! The checksum covers all bytes except the checksum itself.

use std::io::{self, Cursor, Read};

use chrono::{DateTime, TimeZone, Utc};
use crc32fast::Hasher;
use serde_json::Value;

use super::{Payload, Record};
use crate::blob::BlobRef;

/// Smallest legal entry: framing + tag + empty token
const MIN_ENTRY_SIZE: usize = 4 + 1 + 4 + 4;

const TAG_RECORD: u8 = 0;
const TAG_TOMBSTONE: u8 = 1;

const KIND_INLINE: u8 = 0;
const KIND_BLOB: u8 = 1;

/// One entry in the record log
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// Full record state (latest entry per token wins on replay)
    Record(Record),
    /// Deletion marker for a token
    Tombstone(String),
}

impl LogEntry {
    /// The token this entry is about
    pub fn token(&self) -> &str {
        match self {
            LogEntry::Record(record) => &record.token,
            LogEntry::Tombstone(token) => token,
        }
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn push_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

fn push_str(buf: &mut Vec<u8>, s: &str) {
    push_bytes(buf, s.as_bytes());
}

fn serialize_body(entry: &LogEntry) -> Vec<u8> {
    let mut buf = Vec::new();

    match entry {
        LogEntry::Tombstone(token) => {
            buf.push(TAG_TOMBSTONE);
            push_str(&mut buf, token);
        }
        LogEntry::Record(record) => {
            buf.push(TAG_RECORD);
            push_str(&mut buf, &record.token);

            match &record.payload {
                Payload::Inline(content) => {
                    buf.push(KIND_INLINE);
                    push_bytes(&mut buf, content);
                }
                Payload::Blob(blob_ref) => {
                    buf.push(KIND_BLOB);
                    push_str(&mut buf, blob_ref.as_str());
                }
            }

            match &record.display_name {
                Some(name) => {
                    buf.push(1);
                    push_str(&mut buf, name);
                }
                None => buf.push(0),
            }

            buf.extend_from_slice(&record.size.to_le_bytes());
            push_str(&mut buf, &record.checksum);
            buf.extend_from_slice(&record.created_at.timestamp_millis().to_le_bytes());
            buf.extend_from_slice(&record.expires_at.timestamp_millis().to_le_bytes());
            buf.extend_from_slice(&record.max_reads.to_le_bytes());
            buf.extend_from_slice(&record.read_count.to_le_bytes());

            let flags = serde_json::to_vec(&record.flags).unwrap_or_else(|_| b"null".to_vec());
            push_bytes(&mut buf, &flags);
        }
    }

    buf
}

/// Serialize a log entry to its framed byte representation
pub fn encode_entry(entry: &LogEntry) -> Vec<u8> {
    let body = serialize_body(entry);

    // Entry length = 4 (length) + body.len() + 4 (checksum)
    let entry_length = (4 + body.len() + 4) as u32;

    // Checksum covers: length + body
    let mut checksum_data = Vec::with_capacity(4 + body.len());
    checksum_data.extend_from_slice(&entry_length.to_le_bytes());
    checksum_data.extend_from_slice(&body);
    let checksum = crc32(&checksum_data);

    let mut out = Vec::with_capacity(entry_length as usize);
    out.extend_from_slice(&entry_length.to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&checksum.to_le_bytes());

    out
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_lp_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_lp_string<R: Read>(reader: &mut R) -> io::Result<String> {
    String::from_utf8(read_lp_bytes(reader)?)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e)))
}

fn read_timestamp<R: Read>(reader: &mut R) -> io::Result<DateTime<Utc>> {
    let millis = read_i64(reader)?;
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid timestamp: {}", millis),
        )
    })
}

/// Deserialize an entry from bytes, verifying the checksum.
///
/// Returns the entry and the number of bytes consumed.
pub fn decode_entry(data: &[u8]) -> io::Result<(LogEntry, usize)> {
    if data.len() < MIN_ENTRY_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Entry too short",
        ));
    }

    let entry_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if entry_length < MIN_ENTRY_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid entry length: {}", entry_length),
        ));
    }

    if data.len() < entry_length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "Entry truncated: expected {} bytes, got {}",
                entry_length,
                data.len()
            ),
        ));
    }

    let checksum_offset = entry_length - 4;
    let stored_checksum = u32::from_le_bytes([
        data[checksum_offset],
        data[checksum_offset + 1],
        data[checksum_offset + 2],
        data[checksum_offset + 3],
    ]);

    let computed_checksum = crc32(&data[0..checksum_offset]);
    if computed_checksum != stored_checksum {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Checksum mismatch: computed {:08x}, stored {:08x}",
                computed_checksum, stored_checksum
            ),
        ));
    }

    let mut cursor = Cursor::new(&data[4..checksum_offset]);

    let tag = read_u8(&mut cursor)?;
    let token = read_lp_string(&mut cursor)?;

    let entry = match tag {
        TAG_TOMBSTONE => LogEntry::Tombstone(token),
        TAG_RECORD => {
            let kind = read_u8(&mut cursor)?;
            let payload_bytes = read_lp_bytes(&mut cursor)?;
            let payload = match kind {
                KIND_INLINE => Payload::Inline(payload_bytes),
                KIND_BLOB => {
                    let path = String::from_utf8(payload_bytes).map_err(|e| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("Invalid blob path: {}", e),
                        )
                    })?;
                    Payload::Blob(BlobRef::from(path))
                }
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Unknown record kind: {}", other),
                    ))
                }
            };

            let display_name = match read_u8(&mut cursor)? {
                0 => None,
                _ => Some(read_lp_string(&mut cursor)?),
            };

            let size = read_u64(&mut cursor)?;
            let checksum = read_lp_string(&mut cursor)?;
            let created_at = read_timestamp(&mut cursor)?;
            let expires_at = read_timestamp(&mut cursor)?;
            let max_reads = read_u32(&mut cursor)?;
            let read_count = read_u32(&mut cursor)?;

            let flags_bytes = read_lp_bytes(&mut cursor)?;
            let flags: Value = if flags_bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&flags_bytes).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("Invalid flags: {}", e))
                })?
            };

            LogEntry::Record(Record {
                token,
                payload,
                display_name,
                size,
                checksum,
                created_at,
                expires_at,
                max_reads,
                read_count,
                flags,
            })
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown entry tag: {}", other),
            ))
        }
    };

    Ok((entry, entry_length))
}
