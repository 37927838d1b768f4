//! The persistence seam used by the import pipeline.

use crate::error::Result;
use crate::models::{ModelId, ModelRecord, NewModel};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Storage for imported model records.
///
/// Implementations serialize concurrent writers; callers may share one
/// handle between tasks.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Inserts `model`, or updates the record already tracking its managed path.
    async fn store(&self, model: &NewModel) -> Result<ModelId>;
    async fn get(&self, id: ModelId) -> Result<Option<ModelRecord>>;
    /// The oldest record with the given content hash.
    async fn find_by_hash(&self, hash: &str) -> Result<Option<ModelRecord>>;
    async fn find_by_path(&self, managed_path: &Path) -> Result<Option<ModelRecord>>;
    /// Every record sharing `hash`, oldest first.
    async fn find_duplicates(&self, hash: &str) -> Result<Vec<ModelRecord>>;
    /// Distinct content hashes of all records.
    async fn content_hashes(&self) -> Result<Vec<String>>;
    async fn set_thumbnail(&self, id: ModelId, thumbnail: &Path) -> Result<()>;
}

pub type StoreHandle = Arc<dyn ModelStore>;
