use crate::session::{ImportResult, RollbackReport};
use meshvault_config::FileMode;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Where an import currently is. The last three are terminal; the
/// coordinator stays in them until [acknowledged].
///
/// [acknowledged]: crate::import::ImportCoordinator::acknowledge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ImportStage {
    #[default]
    Idle,
    Validation,
    FileDiscovery,
    Hashing,
    FileManagement,
    ThumbnailGeneration,
    DatabaseStorage,
    BackgroundAnalysis,
    Completed,
    Failed,
    Cancelled,
}
impl ImportStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of a running import.
///
/// Files finish out of order under the concurrent profile, so the file a
/// snapshot talks about is identified by both name and index.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportProgress {
    pub stage: ImportStage,
    /// Share of the batch that is done, `0.0..=100.0`.
    pub percent: f32,
    pub current_file: Option<String>,
    pub current_index: Option<usize>,
    pub total_files: usize,
    pub files_hashed: usize,
    pub thumbnails_generated: usize,
    pub analyses_queued: usize,
    pub elapsed: Duration,
    /// Projected from the pace so far; unknown until a file has finished.
    pub remaining: Option<Duration>,
    /// One-based position of this batch.
    pub batch: usize,
    /// This batch plus those still pending.
    pub batches: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportEvent {
    Progress(ImportProgress),
    /// The content of `path` is already in the catalog at `existing`.
    DuplicateInLibrary { path: PathBuf, existing: PathBuf },
    Finished(ImportStage),
}

/// Receives import events. Called from the task driving the import, so
/// implementations must return quickly.
pub trait ImportObserver: Send + Sync {
    fn on_event(&self, event: ImportEvent);
}

impl ImportObserver for mpsc::UnboundedSender<ImportEvent> {
    fn on_event(&self, event: ImportEvent) {
        // A receiver that went away has stopped caring.
        let _ = self.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;
impl ImportObserver for NullObserver {
    fn on_event(&self, _event: ImportEvent) {}
}

/// Everything about an import except the files themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub mode: FileMode,
    /// Required for [`FileMode::KeepOrganized`].
    pub root: Option<PathBuf>,
    pub generate_thumbnails: bool,
    pub queue_analysis: bool,
}
impl ImportOptions {
    pub fn new(mode: FileMode, root: Option<PathBuf>) -> Self {
        Self { mode, root, generate_thumbnails: true, queue_analysis: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub paths: Vec<PathBuf>,
    pub options: ImportOptions,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailCounts {
    pub generated: usize,
    pub cached: usize,
    /// Taken from an image shipped next to the model instead of rendered.
    pub registered: usize,
    pub failed: usize,
}
impl ThumbnailCounts {
    pub fn total(&self) -> usize {
        self.generated + self.cached + self.registered
    }
}

/// How one batch ended.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    /// [`ImportStage::Completed`], [`ImportStage::Failed`] or
    /// [`ImportStage::Cancelled`].
    pub stage: ImportStage,
    pub result: ImportResult,
    pub thumbnails: ThumbnailCounts,
    /// Records written to the catalog.
    pub stored: usize,
    /// Placed files the catalog already tracked by path.
    pub already_cataloged: usize,
    /// Stored files whose content the catalog already held elsewhere.
    pub duplicates_in_library: usize,
    pub analyses_queued: usize,
    /// Set when the batch was cancelled.
    pub rollback: Option<RollbackReport>,
    /// Batches still waiting after this one.
    pub pending_batches: usize,
}
impl ImportOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.stage == ImportStage::Cancelled
    }
}
