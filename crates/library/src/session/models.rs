use crate::session::manager::{FileProgress, FileStage};
use meshvault_config::{DuplicatePolicy, FileMode};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use time::UtcDateTime;

/// Lifecycle of a single file within a session.
///
/// ```text
/// KeepOrganized: Pending → Hashing → Copying → Completed
///                                  ↘ Failed
/// LeaveInPlace:  Pending → Hashing → Completed
/// ```
/// `Skipped` is reached from `Hashing` when the duplicate policy rejects the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Hashing,
    Copying,
    Completed,
    Failed,
    Skipped,
}
impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTask {
    pub original_path: PathBuf,
    pub file_size: u64,
    pub content_hash: Option<String>,
    pub managed_path: Option<PathBuf>,
    pub status: TaskStatus,
    pub error: Option<String>,
}
impl ImportTask {
    pub fn new(original_path: PathBuf, file_size: u64) -> Self {
        Self { original_path, file_size, content_hash: None, managed_path: None, status: TaskStatus::Pending, error: None }
    }

    pub fn file_name(&self) -> String {
        self.original_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

pub type SessionId = String;

/// Unique, time-derived session identifier.
pub(crate) fn next_session_id() -> SessionId {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let now = UtcDateTime::now();
    format!("import-{}-{}", now.unix_timestamp_nanos(), COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// The read-only parts of a session, shared with workers that prepare files
/// concurrently. Workers never touch the [`ImportSession`] itself.
#[derive(Debug)]
pub struct SessionContext {
    pub id: SessionId,
    pub mode: FileMode,
    pub root: Option<PathBuf>,
    pub duplicates: DuplicatePolicy,
    /// Content hashes claimed so far, for [`DuplicatePolicy::SkipDuplicates`].
    pub(crate) seen: Mutex<HashSet<String>>,
}
impl SessionContext {
    /// Records `hash`; returns `false` if an earlier file already had it.
    pub(crate) fn claim(&self, hash: &str) -> bool {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(hash.to_string())
    }
}

/// What preparing one file did, returned by a worker for the session owner to
/// apply with [`ImportSession::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub index: usize,
    pub content_hash: Option<String>,
    pub managed_path: Option<PathBuf>,
    pub status: TaskStatus,
    pub error: Option<String>,
    /// The file stopped at a cancellation check rather than failing.
    pub cancelled: bool,
    /// Destination file created by this outcome.
    pub copied: Option<PathBuf>,
    /// Directories created by this outcome, outermost first.
    pub created_directories: Vec<PathBuf>,
    pub bytes_copied: u64,
}
impl FileOutcome {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            content_hash: None,
            managed_path: None,
            status: TaskStatus::Pending,
            error: None,
            cancelled: false,
            copied: None,
            created_directories: Vec::new(),
            bytes_copied: 0,
        }
    }

    pub(crate) fn failed(mut self, error: impl ToString) -> Self {
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
        self
    }

    pub(crate) fn cancelled(mut self) -> Self {
        self.status = TaskStatus::Failed;
        self.error = Some("cancelled".to_string());
        self.cancelled = true;
        self
    }
}

/// One batch of files moving through the pipeline.
///
/// Owned by a single task; workers receive a [`SessionContext`] and return
/// [`FileOutcome`]s instead of mutating it.
#[derive(Debug)]
pub struct ImportSession {
    pub(crate) context: Arc<SessionContext>,
    pub files: Vec<ImportTask>,
    /// Destination files created this session, in creation order.
    pub copied_files: Vec<PathBuf>,
    /// Directories created this session, in creation order.
    pub created_directories: Vec<PathBuf>,
    pub status: SessionStatus,
    pub(crate) started: Instant,
    pub(crate) bytes_copied: u64,
}
impl ImportSession {
    pub(crate) fn new(context: SessionContext, files: Vec<ImportTask>) -> Self {
        Self {
            context: Arc::new(context),
            files,
            copied_files: Vec::new(),
            created_directories: Vec::new(),
            status: SessionStatus::Pending,
            started: Instant::now(),
            bytes_copied: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.context.id
    }

    pub fn mode(&self) -> FileMode {
        self.context.mode
    }

    pub fn root(&self) -> Option<&std::path::Path> {
        self.context.root.as_deref()
    }

    pub fn context(&self) -> Arc<SessionContext> {
        Arc::clone(&self.context)
    }

    /// Applies a worker's result to the task it describes.
    pub fn apply(&mut self, outcome: FileOutcome) {
        self.status = SessionStatus::Running;
        self.created_directories.extend(outcome.created_directories);
        if let Some(copied) = outcome.copied {
            self.copied_files.push(copied);
        }
        self.bytes_copied += outcome.bytes_copied;
        let Some(task) = self.files.get_mut(outcome.index) else {
            tracing::warn!(index = outcome.index, session = %self.context.id, "Outcome for unknown task");
            return;
        };
        task.content_hash = outcome.content_hash.or(task.content_hash.take());
        task.managed_path = outcome.managed_path;
        task.status = outcome.status;
        task.error = outcome.error;
    }

    /// Moves a task into the stage a worker reports. Stages only advance, and
    /// a task that has reached a final status stays there. Returns the new
    /// status when it changed.
    pub fn track(&mut self, progress: &FileProgress) -> Option<TaskStatus> {
        let task = self.files.get_mut(progress.index)?;
        let next = match progress.stage {
            FileStage::Hashing => TaskStatus::Hashing,
            FileStage::Copying => TaskStatus::Copying,
        };
        let advances = match task.status {
            TaskStatus::Pending => true,
            TaskStatus::Hashing => next == TaskStatus::Copying,
            _ => false,
        };
        if !advances {
            return None;
        }
        task.status = next;
        self.status = SessionStatus::Running;
        Some(next)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.files.iter().filter(|t| t.status == status).count()
    }

    /// Files that share a content hash with an earlier file in this session.
    pub fn duplicate_count(&self) -> usize {
        let mut groups: HashMap<&str, usize> = HashMap::new();
        for hash in self.files.iter().filter_map(|t| t.content_hash.as_deref()) {
            *groups.entry(hash).or_default() += 1;
        }
        groups.values().map(|n| n - 1).sum()
    }
}

/// Totals for a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub session_id: SessionId,
    pub success: bool,
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub duplicate_count: usize,
    /// Size of every imported file, whether copied or left in place.
    pub total_bytes: u64,
    /// Bytes copied into the library; always 0 for files left in place.
    pub bytes_written: u64,
    pub duration: Duration,
    /// `(original path, error)` for every failed file.
    pub errors: Vec<(PathBuf, String)>,
    pub tasks: Vec<ImportTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub removed_files: usize,
    pub removed_directories: usize,
    /// Non-empty directories left in place.
    pub kept_directories: usize,
    pub errors: Vec<String>,
}
impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
