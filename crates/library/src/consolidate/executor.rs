use crate::consolidate::models::{ConsolidationItem, ConsolidationPlan, Operation};
use meshvault_storage::error::{ErrorKind as StorageErrorKind, Result as StorageResult};
use futures::future::join;
use meshvault_storage::{CancellationToken, ContentHasher, DEFAULT_COPY_CHUNK, copy_with_progress, move_file};
use std::path::PathBuf;
use tracing::instrument;

/// Emitted after every actionable item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationProgress {
    pub completed: usize,
    pub total: usize,
    pub current: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub moved: usize,
    pub copied: usize,
    /// Items whose destination already existed, from an earlier run.
    pub already_present: usize,
    pub failed: usize,
    pub cancelled: bool,
}
impl ExecutionReport {
    /// Files written by this run.
    pub fn writes(&self) -> usize {
        self.moved + self.copied
    }
}

/// Carries out every actionable item of `plan`, updating it in place.
///
/// An item whose destination already holds its file counts as done without a
/// transfer, so executing a plan again (or resuming a saved one) only performs
/// the work that is left. A destination taken by different content since the
/// plan was built is never overwritten; the item fails instead. A failing item
/// records its error and the run continues.
/// Cancellation is checked before each item. `on_thumbnail` is called for
/// every thumbnail item that ends up in place.
#[instrument(skip_all, fields(source = %plan.source_root.display(), dest = %plan.dest_root.display()))]
pub async fn execute_plan(
    plan: &mut ConsolidationPlan,
    mut progress: impl FnMut(ConsolidationProgress),
    cancel: &CancellationToken,
    mut on_thumbnail: impl FnMut(&ConsolidationItem),
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    let total = plan.items.iter().filter(|i| i.is_actionable()).count();
    let mut done = 0;
    for item in plan.items.iter_mut().filter(|i| i.is_actionable()) {
        if cancel.is_cancelled() {
            tracing::info!(completed = done, total, "Consolidation cancelled");
            report.cancelled = true;
            break;
        }
        let placed = match item.dest_path.exists() {
            true => already_placed(item, cancel).await,
            false => transfer(item, cancel).await.map(|()| Placed::Transferred),
        };
        match placed {
            Ok(placed) => {
                item.completed = true;
                item.error = None;
                match (placed, item.operation) {
                    (Placed::AlreadyPresent, _) => report.already_present += 1,
                    (Placed::Transferred, Operation::Move) => report.moved += 1,
                    (Placed::Transferred, _) => report.copied += 1,
                }
            },
            Err(e) if e.is_cancelled() => {
                tracing::info!(completed = done, total, "Consolidation cancelled mid-transfer");
                report.cancelled = true;
                break;
            },
            Err(e) => {
                tracing::warn!(source = %item.source_path.display(), error = %*e, "Could not consolidate file");
                item.error = Some((*e).to_string());
                report.failed += 1;
            },
        }
        if item.completed && item.is_thumbnail {
            on_thumbnail(item);
        }
        done += 1;
        progress(ConsolidationProgress { completed: done, total, current: item.file_name() });
    }
    tracing::info!(
        moved = report.moved,
        copied = report.copied,
        already_present = report.already_present,
        failed = report.failed,
        "Consolidation finished"
    );
    report
}

#[derive(Debug, Clone, Copy)]
enum Placed {
    Transferred,
    AlreadyPresent,
}

/// Checks an existing destination against the item's source. A missing source
/// means an earlier run already moved it there.
async fn already_placed(item: &ConsolidationItem, cancel: &CancellationToken) -> StorageResult<Placed> {
    if !item.source_path.exists() {
        return Ok(Placed::AlreadyPresent);
    }
    let hasher = ContentHasher::default();
    let (source, dest) = join(
        hasher.hash(&item.source_path, Some(cancel.clone())),
        hasher.hash(&item.dest_path, Some(cancel.clone())),
    )
    .await;
    if source? != dest? {
        exn::bail!(StorageErrorKind::AlreadyExists(item.dest_path.clone()));
    }
    Ok(Placed::AlreadyPresent)
}

async fn transfer(item: &ConsolidationItem, cancel: &CancellationToken) -> StorageResult<()> {
    let source: PathBuf = item.source_path.clone();
    let dest: PathBuf = item.dest_path.clone();
    let operation = item.operation;
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageErrorKind::from_io(e, parent))?;
        }
        match operation {
            Operation::Move => move_file(&source, &dest, Some(&cancel)),
            Operation::Copy => copy_with_progress(&source, &dest, DEFAULT_COPY_CHUNK, |_| {}, Some(&cancel)).map(|_| ()),
            Operation::Skip => Ok(()),
        }
    })
    .await
    .map_err(|e| StorageErrorKind::Io(std::io::Error::other(e)))?
}
