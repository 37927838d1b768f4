//! Local filesystem primitives used by the import and consolidation pipeline.
//!
//! Everything that touches file *contents* lives here: streaming content
//! hashes, chunked copies with progress, cross-device moves, volume identity
//! and recursive directory walks. Long-running operations take an optional
//! [`CancellationToken`](tokio_util::sync::CancellationToken) and check it
//! between chunks.

mod copy;
pub mod error;
mod hash;
mod models;
mod path;
mod volume;
mod walk;

pub use crate::copy::{DEFAULT_COPY_CHUNK, copy_with_progress, move_file};
pub use crate::hash::{ContentHash, ContentHasher, DEFAULT_CHUNK_SIZE};
pub use crate::models::FileEntry;
pub use crate::path::{dotted_extension, join_within, validate as validate_path};
pub use crate::volume::same_volume;
pub use crate::walk::{FileEntryStream, WalkOptions, walk, walk_all};
pub use tokio_util::sync::CancellationToken;
