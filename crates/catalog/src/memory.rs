//! In-process [`ModelStore`] for ephemeral sessions and tests.

use crate::error::Result;
use crate::models::{ModelId, ModelRecord, NewModel};
use crate::store::ModelStore;
use async_trait::async_trait;
use std::path::Path;
use time::UtcDateTime;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<ModelRecord>>,
}
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<ModelRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn store(&self, model: &NewModel) -> Result<ModelId> {
        let mut records = self.records.write().await;
        let now = UtcDateTime::now();
        if let Some(existing) = records.iter_mut().find(|r| r.managed_path == model.managed_path) {
            let thumbnail = model.thumbnail.clone().or_else(|| existing.thumbnail.take());
            *existing = ModelRecord::from_new(existing.id, model, now);
            existing.thumbnail = thumbnail;
            return Ok(existing.id);
        }
        let id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        records.push(ModelRecord::from_new(id, model, now));
        Ok(id)
    }

    async fn get(&self, id: ModelId) -> Result<Option<ModelRecord>> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<ModelRecord>> {
        Ok(self.records.read().await.iter().find(|r| r.content_hash == hash).cloned())
    }

    async fn find_by_path(&self, managed_path: &Path) -> Result<Option<ModelRecord>> {
        Ok(self.records.read().await.iter().find(|r| r.managed_path == managed_path).cloned())
    }

    async fn find_duplicates(&self, hash: &str) -> Result<Vec<ModelRecord>> {
        Ok(self.records.read().await.iter().filter(|r| r.content_hash == hash).cloned().collect())
    }

    async fn content_hashes(&self) -> Result<Vec<String>> {
        let mut hashes: Vec<String> = self.records.read().await.iter().map(|r| r.content_hash.clone()).collect();
        hashes.sort();
        hashes.dedup();
        Ok(hashes)
    }

    async fn set_thumbnail(&self, id: ModelId, thumbnail: &Path) -> Result<()> {
        if let Some(record) = self.records.write().await.iter_mut().find(|r| r.id == id) {
            record.thumbnail = Some(thumbnail.to_path_buf());
        }
        Ok(())
    }
}
