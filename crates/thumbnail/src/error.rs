//! Rendering and thumbnail cache errors.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A thumbnail error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for thumbnail operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("no model renderer detected on your system")]
    RendererNotFound,
    /// The renderer exited with a non-zero exit code.
    #[display("renderer exited with code: {_0}")]
    RendererFailed(#[error(not(source))] i32),
    /// The renderer was killed by a signal (crash or OOM).
    #[display("renderer terminated abnormally")]
    RendererCrashed,
    /// The renderer reported success but wrote no image.
    #[display("renderer produced no output: {}", _0.display())]
    NoOutput(#[error(not(source))] PathBuf),
    /// Decoding, resizing or encoding an image failed.
    #[display("image processing failed")]
    Image,
    /// The rendered image could not be written into the cache.
    #[display("could not write thumbnail cache: {}", _0.display())]
    Cache(#[error(not(source))] PathBuf),
    /// Content hashes name cache files and must be plain alphanumerics.
    #[display("invalid content hash: {_0}")]
    InvalidHash(#[error(not(source))] String),
    #[display("I/O error")]
    Io,
    #[display("thumbnail generation cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RendererCrashed | Self::Cache(_) | Self::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::RendererFailed(3).to_string(), "renderer exited with code: 3");
        assert_eq!(ErrorKind::InvalidHash("../x".to_string()).to_string(), "invalid content hash: ../x");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::RendererCrashed.is_retryable());
        assert!(!ErrorKind::RendererNotFound.is_retryable());
        assert!(!ErrorKind::InvalidHash(String::new()).is_retryable());
    }
}
