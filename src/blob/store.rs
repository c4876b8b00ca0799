//! # Filesystem Blob Store

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::errors::{BlobError, BlobResult};

/// Protective files marking the root's access policy. Written at init,
/// never deleted by any cleanup pass.
const SENTINEL_FILES: [&str; 3] = [".htaccess", "index.html", "403.html"];

/// Attempts to find an unused storage name before giving up
const NAME_RETRY_LIMIT: usize = 5;

/// Bytes of entropy in a blob name (hex-encoded on disk)
const NAME_ENTROPY_BYTES: usize = 16;

/// Opaque handle to a stored blob, relative to the store root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef(String);

impl BlobRef {
    /// The relative storage path backing this handle
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BlobRef {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Result of a successful `put`
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub blob_ref: BlobRef,
    pub size: u64,
    /// SHA-256 of the stored bytes, hex-encoded
    pub checksum: String,
}

/// Filesystem-backed blob storage
///
/// Blobs live at `<root>/<2-hex shard>/<32 hex chars>`. Names carry 128 bits
/// of entropy and are opened with `create_new`, so two concurrent uploads can
/// never land on the same file.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) a blob store rooted at the given directory
    pub fn open(root: PathBuf) -> BlobResult<Self> {
        fs::create_dir_all(&root).map_err(map_io)?;
        write_sentinels(&root)?;
        Ok(Self { root })
    }

    /// The store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, blob_ref: &BlobRef) -> PathBuf {
        self.root.join(blob_ref.as_str())
    }

    /// Stream bytes to a new unique location.
    ///
    /// The content is hashed while streaming; the file is fsynced before the
    /// handle is returned. Any partial write is removed on failure.
    pub fn put<R: Read>(&self, reader: &mut R) -> BlobResult<PutOutcome> {
        let (blob_ref, mut file) = self.create_unique()?;
        let path = self.full_path(&blob_ref);

        match Self::stream_into(reader, &mut file) {
            Ok((size, checksum)) => Ok(PutOutcome {
                blob_ref,
                size,
                checksum,
            }),
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Pick an entropy-derived name and open it exclusively.
    fn create_unique(&self) -> BlobResult<(BlobRef, File)> {
        for _ in 0..NAME_RETRY_LIMIT {
            let mut bytes = [0u8; NAME_ENTROPY_BYTES];
            OsRng.fill_bytes(&mut bytes);
            let name = hex_encode(&bytes);
            let rel = format!("{}/{}", &name[..2], name);
            let path = self.root.join(&rel);

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(map_io)?;
            }

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((BlobRef(rel), file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(map_io(e)),
            }
        }
        Err(BlobError::NameSpaceExhausted)
    }

    fn stream_into<R: Read>(reader: &mut R, file: &mut File) -> BlobResult<(u64, String)> {
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = [0u8; 8192];

        loop {
            let n = reader.read(&mut buf).map_err(map_io)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).map_err(map_io)?;
            size += n as u64;
        }

        file.sync_all().map_err(map_io)?;
        Ok((size, format!("{:x}", hasher.finalize())))
    }

    /// Open a blob for streaming; returns the file handle and total size
    pub fn open_blob(&self, blob_ref: &BlobRef) -> BlobResult<(File, u64)> {
        let path = self.full_path(blob_ref);
        let file = File::open(&path).map_err(|e| map_read(e, blob_ref))?;
        let size = file.metadata().map_err(map_io)?.len();
        Ok((file, size))
    }

    /// Read an entire blob into memory
    pub fn read(&self, blob_ref: &BlobRef) -> BlobResult<Vec<u8>> {
        fs::read(self.full_path(blob_ref)).map_err(|e| map_read(e, blob_ref))
    }

    /// Read a byte range `[offset, offset + length)`, clamped to the end of
    /// the blob. A `length` of `None` reads to the end.
    ///
    /// An offset outside `[0, size)` fails with `RangeNotSatisfiable`.
    pub fn read_range(
        &self,
        blob_ref: &BlobRef,
        offset: u64,
        length: Option<u64>,
    ) -> BlobResult<Vec<u8>> {
        let (mut file, size) = self.open_blob(blob_ref)?;

        if offset >= size {
            return Err(BlobError::RangeNotSatisfiable { offset, size });
        }

        let end = match length {
            Some(len) => size.min(offset.saturating_add(len)),
            None => size,
        };

        file.seek(SeekFrom::Start(offset)).map_err(map_io)?;
        let mut data = Vec::with_capacity((end - offset) as usize);
        file.take(end - offset)
            .read_to_end(&mut data)
            .map_err(map_io)?;
        Ok(data)
    }

    /// Delete a blob. Idempotent: a missing blob is not an error.
    pub fn delete(&self, blob_ref: &BlobRef) -> BlobResult<()> {
        match fs::remove_file(self.full_path(blob_ref)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(e)),
        }
    }

    /// Size of a stored blob in bytes
    pub fn size(&self, blob_ref: &BlobRef) -> BlobResult<u64> {
        match fs::metadata(self.full_path(blob_ref)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) => Err(map_read(e, blob_ref)),
        }
    }

    /// List all stored blobs with their last-modified times.
    ///
    /// Sentinel and other root-level files are not blobs and are skipped.
    pub fn list(&self) -> BlobResult<Vec<(BlobRef, SystemTime)>> {
        let mut results = Vec::new();

        for entry in fs::read_dir(&self.root).map_err(map_io)? {
            let entry = entry.map_err(map_io)?;
            if !entry.file_type().map_err(map_io)?.is_dir() {
                continue;
            }
            let shard = entry.file_name().to_string_lossy().into_owned();

            for blob in fs::read_dir(entry.path()).map_err(map_io)? {
                let blob = blob.map_err(map_io)?;
                if !blob.file_type().map_err(map_io)?.is_file() {
                    continue;
                }
                let name = blob.file_name().to_string_lossy().into_owned();
                let modified = blob.metadata().map_err(map_io)?.modified().map_err(map_io)?;
                results.push((BlobRef(format!("{}/{}", shard, name)), modified));
            }
        }

        Ok(results)
    }

    /// Remove now-empty shard directories, bottom-up.
    ///
    /// Never removes the root or the sentinel files. Returns the number of
    /// directories removed.
    pub fn clean_empty_dirs(&self) -> BlobResult<usize> {
        let mut removed = 0;

        for entry in fs::read_dir(&self.root).map_err(map_io)? {
            let entry = entry.map_err(map_io)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if SENTINEL_FILES.contains(&name.as_str()) {
                continue;
            }
            if entry.file_type().map_err(map_io)?.is_dir() {
                removed += prune_dir(&entry.path()).map_err(map_io)?;
            }
        }

        Ok(removed)
    }
}

/// Remove the directory if it is (or becomes) empty; returns dirs removed.
fn prune_dir(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut occupied = false;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            removed += prune_dir(&entry.path())?;
            if entry.path().exists() {
                occupied = true;
            }
        } else {
            occupied = true;
        }
    }

    if !occupied {
        fs::remove_dir(dir)?;
        removed += 1;
    }

    Ok(removed)
}

fn write_sentinels(root: &Path) -> BlobResult<()> {
    let contents: [(&str, &str); 3] = [
        (
            ".htaccess",
            "Options -Indexes\nDirectoryIndex 403.html\nAddType text/plain .php\nAddType text/plain .html\nAddType text/plain .htm\nAddType text/plain .htaccess\n",
        ),
        (
            "index.html",
            "<!DOCTYPE html><html><head><title>403 Forbidden</title></head><body><h1>403 Forbidden</h1></body></html>",
        ),
        (
            "403.html",
            "<!DOCTYPE html><html><head><title>403 Forbidden</title></head><body><h1>403 Forbidden</h1><p>Access to this directory is forbidden.</p></body></html>",
        ),
    ];

    for (name, body) in contents {
        let path = root.join(name);
        if !path.exists() {
            fs::write(&path, body).map_err(map_io)?;
        }
    }
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn map_io(e: std::io::Error) -> BlobError {
    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => BlobError::StorageFull,
        _ => BlobError::Io(e.to_string()),
    }
}

fn map_read(e: std::io::Error, blob_ref: &BlobRef) -> BlobError {
    if e.kind() == ErrorKind::NotFound {
        BlobError::NotFound(blob_ref.as_str().to_string())
    } else {
        map_io(e)
    }
}
