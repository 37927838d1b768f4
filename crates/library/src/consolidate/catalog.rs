use crate::consolidate::models::{ConsolidationItem, ConsolidationPlan};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use meshvault_catalog::{ModelStore, NewModel};
use meshvault_storage::ContentHasher;
use meshvault_thumbnail::ThumbnailService;
use std::path::PathBuf;
use tracing::instrument;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordReport {
    /// New catalog records.
    pub stored: usize,
    /// Models already recorded under their library path.
    pub already_cataloged: usize,
    /// Images registered as thumbnails.
    pub thumbnails: usize,
    pub failed: usize,
}

/// Records every model of `plan` that is in the library in the catalog, and
/// seeds `thumbnails` with the images that travelled alongside them.
///
/// Records are keyed by the content of the model's library copy, the same key
/// the thumbnail cache uses, so cache cleanup keeps these images. Running it
/// again for the same plan only fills in what is missing. Failures are logged
/// and counted.
#[instrument(skip_all, fields(dest = %plan.dest_root.display()))]
pub async fn record_consolidated(
    plan: &ConsolidationPlan,
    store: &dyn ModelStore,
    thumbnails: Option<&ThumbnailService>,
    hasher: &ContentHasher,
) -> RecordReport {
    let mut report = RecordReport::default();
    let models = plan.items.iter().filter(|i| i.completed && !i.is_extra && !i.is_thumbnail);
    for model in models {
        let hash = match hasher.hash(&model.dest_path, None).await {
            Ok(hash) => String::from(hash),
            Err(e) => {
                tracing::warn!(path = %model.dest_path.display(), error = %*e, "Could not hash consolidated model");
                report.failed += 1;
                continue;
            },
        };
        let thumbnail = match thumbnails {
            Some(service) => register_thumbnail(plan, model, &hash, service).await,
            None => None,
        };
        report.thumbnails += usize::from(thumbnail.is_some());
        match record(model, hash, thumbnail, store).await {
            Ok(true) => report.stored += 1,
            Ok(false) => report.already_cataloged += 1,
            Err(e) => {
                tracing::warn!(path = %model.dest_path.display(), error = %*e, "Could not record consolidated model");
                report.failed += 1;
            },
        }
    }
    tracing::info!(
        stored = report.stored,
        already_cataloged = report.already_cataloged,
        thumbnails = report.thumbnails,
        failed = report.failed,
        "Consolidated models cataloged"
    );
    report
}

/// The first of the model's thumbnails the cache accepts.
async fn register_thumbnail(
    plan: &ConsolidationPlan,
    model: &ConsolidationItem,
    hash: &str,
    service: &ThumbnailService,
) -> Option<PathBuf> {
    for image in plan.thumbnails_of(&model.source_path).filter(|i| i.completed) {
        match service.register_existing(hash, &image.dest_path).await {
            Ok(thumbnail) => return Some(thumbnail.path),
            Err(e) => tracing::warn!(image = %image.dest_path.display(), error = %*e, "Could not register thumbnail"),
        }
    }
    None
}

/// Stores the model unless its library path is already recorded. Returns
/// whether a record was added.
async fn record(
    model: &ConsolidationItem,
    hash: String,
    thumbnail: Option<PathBuf>,
    store: &dyn ModelStore,
) -> Result<bool> {
    if let Some(existing) = store.find_by_path(&model.dest_path).await.or_raise(|| ErrorKind::Catalog)? {
        if existing.thumbnail.is_none()
            && let Some(thumbnail) = &thumbnail
        {
            store.set_thumbnail(existing.id, thumbnail).await.or_raise(|| ErrorKind::Catalog)?;
        }
        return Ok(false);
    }
    let size = tokio::fs::metadata(&model.dest_path).await.or_raise(|| ErrorKind::Storage)?.len();
    let record = NewModel {
        name: model.source_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
        original_path: model.source_path.clone(),
        managed_path: model.dest_path.clone(),
        content_hash: hash,
        size,
        category: model.category.clone(),
        thumbnail,
    };
    store.store(&record).await.or_raise(|| ErrorKind::Catalog)?;
    Ok(true)
}
