use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// Primary key of a stored model.
pub type ModelId = i64;

/// A model about to be recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewModel {
    /// Display name, usually the original file stem.
    pub name: String,
    pub original_path: PathBuf,
    /// Where the library keeps the file; identical to `original_path` for
    /// files left in place.
    pub managed_path: PathBuf,
    pub content_hash: String,
    pub size: u64,
    /// Library category folder (`STL_Files`, `OBJ_Files`...).
    pub category: String,
    pub thumbnail: Option<PathBuf>,
}

/// A model as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    pub id: ModelId,
    pub name: String,
    pub original_path: PathBuf,
    pub managed_path: PathBuf,
    pub content_hash: String,
    pub size: u64,
    pub category: String,
    pub thumbnail: Option<PathBuf>,
    pub imported_at: UtcDateTime,
}
impl ModelRecord {
    pub(crate) fn from_new(id: ModelId, model: &NewModel, imported_at: UtcDateTime) -> Self {
        Self {
            id,
            name: model.name.clone(),
            original_path: model.original_path.clone(),
            managed_path: model.managed_path.clone(),
            content_hash: model.content_hash.clone(),
            size: model.size,
            category: model.category.clone(),
            thumbnail: model.thumbnail.clone(),
            imported_at,
        }
    }
}

fn path_str(path: &Path, what: &'static str) -> Result<String, Error> {
    Ok(path.to_str().ok_or_raise(|| ErrorKind::InvalidData(what))?.to_string())
}

#[derive(sqlx::FromRow)]
pub(crate) struct ModelRow {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) original_path: String,
    pub(crate) managed_path: String,
    pub(crate) content_hash: String,
    pub(crate) file_size: i64,
    pub(crate) category: String,
    pub(crate) thumbnail_path: Option<String>,
    pub(crate) imported_at: i64,
}
impl TryFrom<ModelRow> for ModelRecord {
    type Error = Error;
    fn try_from(row: ModelRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            original_path: PathBuf::from(row.original_path),
            managed_path: PathBuf::from(row.managed_path),
            content_hash: row.content_hash,
            size: u64::try_from(row.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            category: row.category,
            thumbnail: row.thumbnail_path.map(PathBuf::from),
            imported_at: UtcDateTime::from_unix_timestamp(row.imported_at)
                .or_raise(|| ErrorKind::InvalidData("import date"))?,
        })
    }
}

/// Bindable column values for an insert.
pub(crate) struct NewModelRow {
    pub(crate) name: String,
    pub(crate) original_path: String,
    pub(crate) managed_path: String,
    pub(crate) content_hash: String,
    pub(crate) file_size: i64,
    pub(crate) category: String,
    pub(crate) thumbnail_path: Option<String>,
}
impl TryFrom<&NewModel> for NewModelRow {
    type Error = Error;
    fn try_from(model: &NewModel) -> Result<Self, Self::Error> {
        Ok(Self {
            name: model.name.clone(),
            original_path: path_str(&model.original_path, "original path")?,
            managed_path: path_str(&model.managed_path, "managed path")?,
            content_hash: model.content_hash.clone(),
            file_size: i64::try_from(model.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            category: model.category.clone(),
            thumbnail_path: model.thumbnail.as_deref().map(|p| path_str(p, "thumbnail path")).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ModelRow {
        ModelRow {
            id: 7,
            name: "benchy".to_string(),
            original_path: "/downloads/benchy.stl".to_string(),
            managed_path: "/library/STL_Files/ab12.stl".to_string(),
            content_hash: "ab12".to_string(),
            file_size: 1024,
            category: "STL_Files".to_string(),
            thumbnail_path: None,
            imported_at: 1_767_225_600,
        }
    }

    #[test]
    fn test_row_to_record() {
        let record = ModelRecord::try_from(row()).unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.size, 1024);
        assert_eq!(record.managed_path, PathBuf::from("/library/STL_Files/ab12.stl"));
        assert_eq!(record.imported_at.unix_timestamp(), 1_767_225_600);
    }

    #[test]
    fn test_negative_size_is_invalid() {
        let err = ModelRecord::try_from(ModelRow { file_size: -1, ..row() }).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("file size")));
    }

    #[test]
    fn test_new_model_to_row() {
        let model = NewModel {
            name: "cube".to_string(),
            original_path: PathBuf::from("/in/cube.obj"),
            managed_path: PathBuf::from("/lib/OBJ_Files/cd34.obj"),
            content_hash: "cd34".to_string(),
            size: 99,
            category: "OBJ_Files".to_string(),
            thumbnail: Some(PathBuf::from("/thumbs/cd34.png")),
        };
        let row = NewModelRow::try_from(&model).unwrap();
        assert_eq!(row.file_size, 99);
        assert_eq!(row.thumbnail_path.as_deref(), Some("/thumbs/cd34.png"));
    }
}
