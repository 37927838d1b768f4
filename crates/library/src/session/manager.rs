use crate::error::{ErrorKind, Result};
use crate::session::models::{
    FileOutcome, ImportResult, ImportSession, ImportTask, RollbackReport, SessionContext, SessionId, SessionStatus,
    TaskStatus, next_session_id,
};
use crate::session::roots::RootRegistry;
use crate::template::{PathGenerator, Placement, with_suffix};
use futures::future::join;
use meshvault_config::{DuplicatePolicy, FileMode};
use meshvault_storage::error::{ErrorKind as StorageErrorKind, Result as StorageResult};
use meshvault_storage::{CancellationToken, ContentHasher, DEFAULT_COPY_CHUNK, copy_with_progress};
use std::collections::HashSet;
use std::io::ErrorKind as IoKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::instrument;

/// Attempts at finding a free destination when another process keeps
/// creating files under the chosen name.
const MAX_PLACEMENT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStage {
    Hashing,
    Copying,
}

/// Progress within one file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileProgress {
    pub index: usize,
    pub stage: FileStage,
    /// `0.0..=100.0` within the current stage.
    pub percent: f32,
}

/// Places files into a library and keeps enough bookkeeping to undo it.
///
/// At most one [`ImportSession`] is active per manager. Preparing individual
/// files only needs `&self`, so workers may share one manager through an
/// [`Arc`] while the session owner applies their [`FileOutcome`]s.
pub struct FileManager {
    hasher: ContentHasher,
    chunk_size: usize,
    names: PathGenerator,
    registry: Arc<dyn RootRegistry>,
    configured: Vec<PathBuf>,
    active: Mutex<Option<SessionId>>,
    /// Destinations picked by in-flight copies.
    reserved: Mutex<HashSet<PathBuf>>,
}
impl FileManager {
    pub fn new(registry: Arc<dyn RootRegistry>, names: PathGenerator) -> Self {
        Self {
            hasher: ContentHasher::default(),
            chunk_size: DEFAULT_COPY_CHUNK,
            names,
            registry,
            configured: Vec::new(),
            active: Mutex::default(),
            reserved: Mutex::default(),
        }
    }

    /// Read and copy in chunks of `chunk_size` bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.hasher = ContentHasher::new(chunk_size);
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Roots from configuration, accepted without consulting the registry.
    pub fn with_configured_roots(mut self, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        self.configured = roots.into_iter().collect();
        self
    }

    pub fn has_active_session(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Checks that `root` can receive organized files.
    ///
    /// Nothing is required for [`FileMode::LeaveInPlace`]. Otherwise the root
    /// must be an existing, writable directory; a valid root that is not yet
    /// known is registered.
    #[instrument(level = "debug", skip(self))]
    pub fn validate_root(&self, root: Option<&Path>, mode: FileMode) -> Result<Option<PathBuf>> {
        if mode == FileMode::LeaveInPlace {
            return Ok(None);
        }
        let Some(root) = root else {
            exn::bail!(ErrorKind::MissingRoot);
        };
        if !std::fs::metadata(root).is_ok_and(|m| m.is_dir()) {
            exn::bail!(ErrorKind::InvalidRoot(root.to_path_buf()));
        }
        // The check file is removed when dropped.
        if tempfile::Builder::new().prefix(".meshvault-write-check-").tempfile_in(root).is_err() {
            exn::bail!(ErrorKind::RootNotWritable(root.to_path_buf()));
        }
        if !self.configured.iter().any(|r| r == root) && !self.registry.is_registered(root)? {
            tracing::info!(root = %root.display(), "Registering new library root");
            self.registry.register(root)?;
        }
        Ok(Some(root.to_path_buf()))
    }

    /// Opens a session for `paths`.
    ///
    /// Paths that are missing or not regular files are dropped with a
    /// warning. Fails if a session is already active, if the root is invalid
    /// for `mode`, or if no file survives.
    #[instrument(skip(self, paths), fields(paths = paths.len()))]
    pub fn start_session(
        &self,
        paths: &[PathBuf],
        mode: FileMode,
        root: Option<&Path>,
        duplicates: DuplicatePolicy,
    ) -> Result<ImportSession> {
        let mut active = lock(&self.active);
        if active.is_some() {
            exn::bail!(ErrorKind::SessionActive);
        }
        let root = self.validate_root(root, mode)?;
        let files: Vec<ImportTask> = paths
            .iter()
            .filter_map(|path| match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => Some(ImportTask::new(path.clone(), meta.len())),
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "Skipping path that is not a regular file");
                    None
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping inaccessible path");
                    None
                },
            })
            .collect();
        if files.is_empty() {
            exn::bail!(ErrorKind::NoValidFiles);
        }
        let context = SessionContext { id: next_session_id(), mode, root, duplicates, seen: Mutex::default() };
        tracing::info!(session = %context.id, files = files.len(), ?mode, "Import session started");
        *active = Some(context.id.clone());
        Ok(ImportSession::new(context, files))
    }

    /// Hashes and places the file at `index`, updating the session in place.
    /// The task's status follows the stages as they happen.
    pub async fn process_file(
        self: &Arc<Self>,
        session: &mut ImportSession,
        index: usize,
        mut progress: impl FnMut(FileProgress) + Send + 'static,
        cancel: &CancellationToken,
    ) -> TaskStatus {
        let Some(path) = session.files.get(index).map(|t| t.original_path.clone()) else {
            tracing::warn!(index, session = %session.id(), "No such task");
            return TaskStatus::Failed;
        };
        let (stages, mut inbox) = mpsc::unbounded_channel();
        let report = move |p: FileProgress| {
            let _ = stages.send(p);
            progress(p);
        };
        let context = session.context();
        let prepare = self.prepare_file(&context, index, path, report, cancel);
        let track = async {
            while let Some(p) = inbox.recv().await {
                session.track(&p);
            }
        };
        let (outcome, ()) = join(prepare, track).await;
        let status = outcome.status;
        session.apply(outcome);
        status
    }

    /// Hashes and places one file without touching the session, for workers
    /// that run alongside the session owner. Never fails: problems are
    /// described by the returned [`FileOutcome`].
    pub async fn prepare_file(
        self: &Arc<Self>,
        context: &Arc<SessionContext>,
        index: usize,
        path: PathBuf,
        mut progress: impl FnMut(FileProgress) + Send + 'static,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let manager = Arc::clone(self);
        let context = Arc::clone(context);
        let cancel = cancel.clone();
        let task = move || manager.prepare_blocking(&context, index, &path, &mut progress, &cancel);
        match tokio::task::spawn_blocking(task).await {
            Ok(outcome) => outcome,
            Err(e) => FileOutcome::new(index).failed(e),
        }
    }

    #[instrument(level = "debug", skip(self, context, progress, cancel), fields(session = %context.id, path = %path.display()))]
    fn prepare_blocking(
        &self,
        context: &SessionContext,
        index: usize,
        path: &Path,
        progress: &mut dyn FnMut(FileProgress),
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let mut outcome = FileOutcome::new(index);
        if cancel.is_cancelled() {
            return outcome.cancelled();
        }

        progress(FileProgress { index, stage: FileStage::Hashing, percent: 0.0 });
        let hash = match self.hasher.hash_file(path, Some(cancel)) {
            Ok(hash) => String::from(hash),
            Err(e) if e.is_cancelled() => return outcome.cancelled(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %*e, "Could not hash file");
                return outcome.failed(&*e);
            },
        };
        progress(FileProgress { index, stage: FileStage::Hashing, percent: 100.0 });
        outcome.content_hash = Some(hash.clone());

        if context.duplicates == DuplicatePolicy::SkipDuplicates && !context.claim(&hash) {
            tracing::debug!(path = %path.display(), hash, "Skipping duplicate content");
            outcome.status = TaskStatus::Skipped;
            return outcome;
        }

        match (context.mode, &context.root) {
            (FileMode::LeaveInPlace, _) => {
                outcome.managed_path = Some(path.to_path_buf());
                outcome.status = TaskStatus::Completed;
                outcome
            },
            (FileMode::KeepOrganized, Some(root)) => self.place(root, &hash, path, outcome, progress, cancel),
            (FileMode::KeepOrganized, None) => outcome.failed(ErrorKind::MissingRoot),
        }
    }

    fn place(
        &self,
        root: &Path,
        hash: &str,
        path: &Path,
        mut outcome: FileOutcome,
        progress: &mut dyn FnMut(FileProgress),
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let index = outcome.index;
        let placement = Placement::new(hash, path);
        let name = match self.names.generate_with_ext(&placement) {
            Ok(name) => name,
            Err(e) => return outcome.failed(&*e),
        };
        let target = root.join(placement.category).join(name);
        let Some(parent) = target.parent() else {
            return outcome.failed(ErrorKind::Template);
        };
        if let Err(e) = create_missing_dirs(root, parent, &mut outcome.created_directories) {
            return outcome.failed(&*e);
        }

        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            if cancel.is_cancelled() {
                return outcome.cancelled();
            }
            let Some(destination) = self.reserve(&target) else {
                break;
            };
            progress(FileProgress { index, stage: FileStage::Copying, percent: 0.0 });
            let copied = copy_with_progress(
                path,
                &destination,
                self.chunk_size,
                |percent| progress(FileProgress { index, stage: FileStage::Copying, percent }),
                Some(cancel),
            );
            self.release(&destination);
            match copied {
                Ok(bytes) => {
                    tracing::debug!(from = %path.display(), to = %destination.display(), bytes, "File placed");
                    outcome.copied = Some(destination.clone());
                    outcome.managed_path = Some(destination);
                    outcome.bytes_copied = bytes;
                    outcome.status = TaskStatus::Completed;
                    return outcome;
                },
                Err(e) if e.is_cancelled() => return outcome.cancelled(),
                Err(e) if matches!(&*e, StorageErrorKind::AlreadyExists(_)) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %*e, "Could not copy file into library");
                    return outcome.failed(&*e);
                },
            }
        }
        outcome.failed(format!("no free destination for {}", target.display()))
    }

    /// Picks the first of `target`, `target_1`, `target_2`, … that neither
    /// exists on disk nor is claimed by another in-flight copy.
    fn reserve(&self, target: &Path) -> Option<PathBuf> {
        let mut reserved = lock(&self.reserved);
        let destination = (0..).map(|n| with_suffix(target, n)).find(|p| !reserved.contains(p) && !p.exists())?;
        reserved.insert(destination.clone());
        Some(destination)
    }

    fn release(&self, destination: &Path) {
        lock(&self.reserved).remove(destination);
    }

    /// Removes everything the session created: copied files first (newest
    /// first), then directories that are now empty. Failures are collected
    /// and logged; a non-empty directory is never removed.
    #[instrument(skip_all, fields(session = %session.id()))]
    pub fn rollback_session(&self, session: &mut ImportSession) -> RollbackReport {
        let mut report = RollbackReport::default();
        for file in session.copied_files.iter().rev() {
            match std::fs::remove_file(file) {
                Ok(()) => report.removed_files += 1,
                Err(e) if e.kind() == IoKind::NotFound => {},
                Err(e) => {
                    tracing::warn!(path = %file.display(), error = %e, "Could not remove copied file");
                    report.errors.push(format!("{}: {e}", file.display()));
                },
            }
        }
        for dir in session.created_directories.iter().rev() {
            let empty = match std::fs::read_dir(dir) {
                Ok(mut entries) => entries.next().is_none(),
                Err(e) if e.kind() == IoKind::NotFound => continue,
                Err(e) => {
                    report.errors.push(format!("{}: {e}", dir.display()));
                    continue;
                },
            };
            if !empty {
                tracing::debug!(path = %dir.display(), "Keeping non-empty directory");
                report.kept_directories += 1;
                continue;
            }
            match std::fs::remove_dir(dir) {
                Ok(()) => report.removed_directories += 1,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Could not remove created directory");
                    report.errors.push(format!("{}: {e}", dir.display()));
                },
            }
        }

        let removed: HashSet<PathBuf> = session.copied_files.drain(..).collect();
        session.created_directories.clear();
        for task in &mut session.files {
            if task.managed_path.as_ref().is_some_and(|p| removed.contains(p)) {
                task.managed_path = None;
            }
        }
        session.status = SessionStatus::Failed;
        tracing::info!(
            files = report.removed_files,
            directories = report.removed_directories,
            errors = report.errors.len(),
            "Import session rolled back"
        );
        report
    }

    /// Closes `session`, freeing the active-session slot.
    #[instrument(skip_all, fields(session = %session.id(), success = success))]
    pub fn complete_session(&self, mut session: ImportSession, success: bool) -> ImportResult {
        {
            let mut active = lock(&self.active);
            if active.as_deref() == Some(session.id()) {
                *active = None;
            }
        }
        session.status = if success { SessionStatus::Completed } else { SessionStatus::Failed };
        let errors = session
            .files
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| (t.original_path.clone(), t.error.clone().unwrap_or_default()))
            .collect();
        let result = ImportResult {
            session_id: session.id().to_string(),
            success,
            total_files: session.files.len(),
            processed_files: session.count(TaskStatus::Completed),
            failed_files: session.count(TaskStatus::Failed),
            skipped_files: session.count(TaskStatus::Skipped),
            duplicate_count: session.duplicate_count(),
            total_bytes: session.files.iter().filter(|t| t.status == TaskStatus::Completed).map(|t| t.file_size).sum(),
            bytes_written: session.bytes_copied,
            duration: session.started.elapsed(),
            errors,
            tasks: session.files,
        };
        tracing::info!(
            processed = result.processed_files,
            failed = result.failed_files,
            skipped = result.skipped_files,
            duplicates = result.duplicate_count,
            "Import session completed"
        );
        result
    }
}

/// Creates the missing directories between `root` and `dir`, outermost first,
/// appending each one actually created by this call to `created`.
fn create_missing_dirs(root: &Path, dir: &Path, created: &mut Vec<PathBuf>) -> StorageResult<()> {
    let mut missing: Vec<&Path> = dir.ancestors().take_while(|d| *d != root && d.starts_with(root) && !d.exists()).collect();
    missing.reverse();
    for dir in missing {
        match std::fs::create_dir(dir) {
            Ok(()) => created.push(dir.to_path_buf()),
            // Another worker got there first; it owns the directory.
            Err(e) if e.kind() == IoKind::AlreadyExists && dir.is_dir() => {},
            Err(e) => exn::bail!(StorageErrorKind::from_io(e, dir)),
        }
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
