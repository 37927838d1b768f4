//! SQLite-backed [`ModelStore`].

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{ModelId, ModelRecord, ModelRow, NewModel, NewModelRow};
use crate::store::ModelStore;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use std::path::Path;
use time::UtcDateTime;
use tokio::sync::Mutex;
use tracing::instrument;

/// Catalog repository over a SQLite pool.
///
/// Writes go through a single async lock on top of SQLite's own writer lock,
/// so concurrent import workers queue in-process rather than spinning on
/// `SQLITE_BUSY`.
#[derive(Debug)]
pub struct Repository {
    pool: SqlitePool,
    writer: Mutex<()>,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, writer: Mutex::new(()) }
    }

    fn sqlx_hates_paths(path: &Path) -> Result<String> {
        Ok(path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
    }

    async fn fetch_one_by(&self, query: &'static str, value: String) -> Result<Option<ModelRecord>> {
        let row: Option<ModelRow> = sqlx::query_as(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ModelRecord::try_from).transpose()
    }
}

#[async_trait]
impl ModelStore for Repository {
    #[instrument(level = "debug", skip_all, fields(path = %model.managed_path.display()))]
    async fn store(&self, model: &NewModel) -> Result<ModelId> {
        let row = NewModelRow::try_from(model)?;
        let _writer = self.writer.lock().await;
        let (id,): (i64,) = sqlx::query_as(include_str!("../queries/upsert_model.sql"))
            .bind(row.name)
            .bind(row.original_path)
            .bind(row.managed_path)
            .bind(row.content_hash)
            .bind(row.file_size)
            .bind(row.category)
            .bind(row.thumbnail_path)
            .bind(UtcDateTime::now().unix_timestamp())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(id)
    }

    async fn get(&self, id: ModelId) -> Result<Option<ModelRecord>> {
        let row: Option<ModelRow> = sqlx::query_as(include_str!("../queries/select_model_by_id.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ModelRecord::try_from).transpose()
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<ModelRecord>> {
        self.fetch_one_by(include_str!("../queries/select_model_by_hash.sql"), hash.to_string()).await
    }

    async fn find_by_path(&self, managed_path: &Path) -> Result<Option<ModelRecord>> {
        let path = Self::sqlx_hates_paths(managed_path)?;
        self.fetch_one_by(include_str!("../queries/select_model_by_path.sql"), path).await
    }

    async fn find_duplicates(&self, hash: &str) -> Result<Vec<ModelRecord>> {
        let rows: Vec<ModelRow> = sqlx::query_as(include_str!("../queries/select_models_by_hash.sql"))
            .bind(hash)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ModelRecord::try_from).collect()
    }

    async fn content_hashes(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(include_str!("../queries/select_content_hashes.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(hash,)| hash).collect())
    }

    async fn set_thumbnail(&self, id: ModelId, thumbnail: &Path) -> Result<()> {
        let thumbnail = Self::sqlx_hates_paths(thumbnail)?;
        let _writer = self.writer.lock().await;
        sqlx::query(include_str!("../queries/update_thumbnail.sql"))
            .bind(thumbnail)
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn model(name: &str, hash: &str) -> NewModel {
        NewModel {
            name: name.to_string(),
            original_path: PathBuf::from(format!("/downloads/{name}.stl")),
            managed_path: PathBuf::from(format!("/library/STL_Files/{name}.stl")),
            content_hash: hash.to_string(),
            size: 2048,
            category: "STL_Files".to_string(),
            thumbnail: None,
        }
    }

    async fn repo() -> (Database, Repository) {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        (db, repo)
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let (db, repo) = repo().await;
        let id = repo.store(&model("benchy", "aaa")).await.unwrap();
        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.name, "benchy");
        assert_eq!(record.size, 2048);
        assert!(repo.get(id + 100).await.unwrap().is_none());
        db.close().await;
    }

    #[tokio::test]
    async fn test_store_is_keyed_on_managed_path() {
        let (db, repo) = repo().await;
        let first = repo.store(&model("benchy", "aaa")).await.unwrap();
        let second = repo.store(&model("benchy", "bbb")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.get(first).await.unwrap().unwrap().content_hash, "bbb");
        db.close().await;
    }

    #[tokio::test]
    async fn test_lookup_by_hash_and_path() {
        let (db, repo) = repo().await;
        repo.store(&model("a", "same")).await.unwrap();
        repo.store(&model("b", "same")).await.unwrap();
        repo.store(&model("c", "other")).await.unwrap();

        let first = repo.find_by_hash("same").await.unwrap().unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(repo.find_duplicates("same").await.unwrap().len(), 2);
        assert!(repo.find_by_hash("missing").await.unwrap().is_none());

        let by_path = repo.find_by_path(Path::new("/library/STL_Files/c.stl")).await.unwrap().unwrap();
        assert_eq!(by_path.content_hash, "other");

        let mut hashes = repo.content_hashes().await.unwrap();
        hashes.sort();
        assert_eq!(hashes, vec!["other".to_string(), "same".to_string()]);
        db.close().await;
    }

    #[tokio::test]
    async fn test_set_thumbnail() {
        let (db, repo) = repo().await;
        let id = repo.store(&model("a", "h")).await.unwrap();
        repo.set_thumbnail(id, Path::new("/thumbs/h.png")).await.unwrap();
        assert_eq!(repo.get(id).await.unwrap().unwrap().thumbnail, Some(PathBuf::from("/thumbs/h.png")));
        // A later store without a thumbnail keeps the existing one.
        repo.store(&model("a", "h")).await.unwrap();
        assert_eq!(repo.get(id).await.unwrap().unwrap().thumbnail, Some(PathBuf::from("/thumbs/h.png")));
        db.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let (db, repo) = repo().await;
        let repo = Arc::new(repo);
        let handles: Vec<_> = (0..20)
            .map(|n| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move { repo.store(&model(&format!("m{n}"), "dup")).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(repo.find_duplicates("dup").await.unwrap().len(), 20);
        db.close().await;
    }
}
