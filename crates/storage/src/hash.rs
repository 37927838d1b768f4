//! Streaming content fingerprints.
//!
//! Files are fed through BLAKE3 in fixed-size chunks so memory use stays flat
//! regardless of model size (multi-gigabyte scans are not unusual). The hex
//! digest doubles as a deduplication key and as the deterministic name of
//! derived artifacts such as thumbnails.

use crate::error::{ErrorKind, Result};
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind as IoKind, Read};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Default read size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Hex-encoded BLAKE3 digest of a file's contents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(String);
impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        Self(hash.to_hex().to_string())
    }
}
impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}
impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes [`ContentHash`]es by streaming files in fixed-size chunks.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    chunk_size: usize,
}
impl Default for ContentHasher {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}
impl ContentHasher {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Hash the file at `path`, blocking the current thread.
    ///
    /// Cancellation is observed between chunk reads. Any failure (read error
    /// or cancellation) discards the partial digest.
    #[instrument(level = "debug", skip(self, cancel), fields(path = %path.as_ref().display()))]
    pub fn hash_file(&self, path: impl AsRef<Path>, cancel: Option<&CancellationToken>) -> Result<ContentHash> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| ErrorKind::from_io(e, path))?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0; self.chunk_size];
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                exn::bail!(ErrorKind::Cancelled);
            }
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == IoKind::Interrupted => continue,
                Err(e) => exn::bail!(ErrorKind::from_io(e, path)),
            };
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize().into())
    }

    /// Hash the file at `path` on the blocking thread pool.
    pub async fn hash(&self, path: impl AsRef<Path>, cancel: Option<CancellationToken>) -> Result<ContentHash> {
        let hasher = *self;
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || hasher.hash_file(&path, cancel.as_ref()))
            .await
            .map_err(|e| ErrorKind::Io(std::io::Error::other(e)))?
    }

    /// Hash an in-memory buffer. Used for content that never touches disk.
    pub fn hash_bytes(&self, data: &[u8]) -> ContentHash {
        blake3::hash(data).into()
    }
}
