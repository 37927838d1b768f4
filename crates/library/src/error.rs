//! Only session preconditions surface as errors from the import pipeline.
//! Everything that goes wrong with an individual file is recorded on its task
//! (or plan item) and aggregated into the final report instead.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("issue with path generation from template")]
    Template,
    /// Organizing files requires a destination library root.
    #[display("a library root is required to keep files organized")]
    MissingRoot,
    #[display("library root does not exist or is not a directory: {}", _0.display())]
    InvalidRoot(#[error(not(source))] PathBuf),
    #[display("library root is not writable: {}", _0.display())]
    RootNotWritable(#[error(not(source))] PathBuf),
    /// Every requested path was missing or not a regular file.
    #[display("no importable files were found")]
    NoValidFiles,
    #[display("an import session is already active")]
    SessionActive,
    #[display("an import is already running")]
    ImportRunning,
    #[display("could not read or write persisted state")]
    State,
    #[display("could not access the model catalog")]
    Catalog,
    #[display("could not read source directory")]
    Storage,
    #[display("consolidation plan could not be saved or loaded: {}", _0.display())]
    Plan(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SessionActive | Self::ImportRunning | Self::State | Self::Catalog)
    }

    /// Returns `true` if the request was rejected before any file was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingRoot | Self::InvalidRoot(_) | Self::RootNotWritable(_) | Self::NoValidFiles
        )
    }
}
