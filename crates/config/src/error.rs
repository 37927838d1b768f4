//! Configuration and persisted-state errors.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The layered configuration could not be extracted (bad syntax, wrong types).
    #[display("invalid configuration")]
    Invalid,
    /// An explicitly requested configuration file does not exist.
    #[display("configuration file not found: {}", _0.display())]
    FileNotFound(#[error(not(source))] PathBuf),
    /// No home directory could be determined for default locations.
    #[display("could not determine platform directories")]
    NoProjectDirs,
    /// A persisted state file exists but does not contain valid JSON.
    #[display("corrupt state file: {}", _0.display())]
    CorruptState(#[error(not(source))] PathBuf),
    /// Reading or writing a state file failed.
    #[display("could not access state file: {}", _0.display())]
    StateIo(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StateIo(_))
    }
}
