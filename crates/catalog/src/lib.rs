//! Model catalog persistence.
//!
//! The import pipeline only needs a handful of operations from its
//! persistence layer, captured by the [`ModelStore`] trait: record a model,
//! look it up by id, content hash or managed path, and find duplicates.
//!
//! Two implementations are provided:
//! - [`Repository`] over SQLite ([`Database`] owns the pool and migrations),
//! - [`MemoryStore`] for ephemeral use and tests.

mod db;
pub mod error;
mod memory;
mod models;
mod repo;
mod store;

pub use crate::db::Database;
pub use crate::memory::MemoryStore;
pub use crate::models::{ModelId, ModelRecord, NewModel};
pub use crate::repo::Repository;
pub use crate::store::{ModelStore, StoreHandle};
