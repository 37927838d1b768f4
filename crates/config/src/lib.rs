//! Configuration and persisted state for meshvault.
//!
//! [`Config`] is read-only for the lifetime of a process and layered with
//! [figment]; [`StateStore`] holds the small amount of state the pipeline
//! itself mutates (pending import batches, extra-file decisions and
//! registered library roots).

pub mod error;
mod policy;
mod settings;
mod state;

pub use crate::policy::{ExtraFileDecision, ExtraFilePolicy};
pub use crate::settings::{
    Config, DEFAULT_BATCH_SIZE, DEFAULT_THUMBNAIL_SIZES, DuplicatePolicy, ExecutionProfile, FileMode, ImportConfig,
    LibraryConfig, PathsConfig, ThumbnailConfig,
};
pub use crate::state::StateStore;
