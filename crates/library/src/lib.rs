//! The meshvault import pipeline.
//!
//! - [`session`]: placing one batch of files into a library, with rollback.
//! - [`import`]: the coordinator that batches requests and drives them
//!   through placement, thumbnails, the catalog and background analysis.
//! - [`consolidate`]: planning and executing the retrofit of an existing
//!   folder tree into the library layout.
//! - [`classify`]: extension categories, the security filter and thumbnail
//!   pairing shared by all of the above.

pub mod classify;
pub mod consolidate;
pub mod error;
pub mod import;
pub mod session;
mod template;

pub use crate::template::{DEFAULT_TEMPLATE, PathGenerator, Placement};
