use crate::classify::{FileClass, category_folder, find_paired_image};
use crate::error::{ErrorKind, Result};
use crate::import::analysis::{AnalysisJob, AnalysisQueue, NoAnalysis};
use crate::import::batches::{PendingBatchStore, split_batches};
use crate::import::models::{
    ImportEvent, ImportObserver, ImportOptions, ImportOutcome, ImportProgress, ImportRequest, ImportStage,
    ThumbnailCounts,
};
use crate::session::{FileManager, FileOutcome, FileProgress, FileStage, ImportSession, SessionContext, TaskStatus};
use exn::ResultExt;
use futures::future::{join, join_all};
use meshvault_catalog::{NewModel, StoreHandle};
use meshvault_config::{Config, DuplicatePolicy, ExecutionProfile};
use meshvault_storage::CancellationToken;
use meshvault_thumbnail::{RenderOptions, ThumbnailService};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Tunables of an [`ImportCoordinator`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub profile: ExecutionProfile,
    /// Most files handled by one batch; the rest are deferred.
    pub batch_size: usize,
    pub preparation_workers: usize,
    pub thumbnail_workers: usize,
    /// Placed files allowed to wait for a thumbnail worker before
    /// preparation workers pause.
    pub queue_limit: usize,
    pub duplicates: DuplicatePolicy,
    pub render: RenderOptions,
}
impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            profile: config.import.profile,
            batch_size: config.import.batch_size(),
            preparation_workers: config.import.preparation_workers(),
            thumbnail_workers: config.import.thumbnail_workers(),
            queue_limit: config.import.queue_limit(),
            duplicates: config.library.duplicates,
            render: RenderOptions {
                material: config.thumbnails.material.clone(),
                background: config.thumbnails.background.clone(),
                ..RenderOptions::default()
            },
        }
    }
}
impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Drives imports through placement, thumbnails, the catalog and analysis.
///
/// Requests larger than [`CoordinatorSettings::batch_size`] are split: the
/// first batch runs immediately and the others are persisted as pending
/// batches, picked up one at a time by [`process_next_pending`]. One import
/// runs at a time; a second `start` while one is running is rejected.
///
/// [`process_next_pending`]: ImportCoordinator::process_next_pending
pub struct ImportCoordinator {
    files: Arc<FileManager>,
    thumbnails: Option<Arc<ThumbnailService>>,
    store: StoreHandle,
    pending: Arc<dyn PendingBatchStore>,
    analysis: Arc<dyn AnalysisQueue>,
    settings: CoordinatorSettings,
    running: AtomicBool,
    /// Batches finished since the last [`start`](ImportCoordinator::start).
    batches_done: AtomicUsize,
    stage: Mutex<ImportStage>,
    cancel: Mutex<CancellationToken>,
}
impl ImportCoordinator {
    pub fn new(
        files: Arc<FileManager>,
        store: StoreHandle,
        pending: Arc<dyn PendingBatchStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            files,
            thumbnails: None,
            store,
            pending,
            analysis: Arc::new(NoAnalysis),
            settings,
            running: AtomicBool::new(false),
            batches_done: AtomicUsize::new(0),
            stage: Mutex::default(),
            cancel: Mutex::default(),
        }
    }

    pub fn with_thumbnails(mut self, service: Arc<ThumbnailService>) -> Self {
        self.thumbnails = Some(service);
        self
    }

    pub fn with_analysis(mut self, queue: Arc<dyn AnalysisQueue>) -> Self {
        self.analysis = queue;
        self
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stage(&self) -> ImportStage {
        *lock(&self.stage)
    }

    /// Asks the running import to stop at its next checkpoint. The batch in
    /// progress is rolled back; earlier batches are kept.
    pub fn cancel(&self) {
        tracing::info!("Import cancellation requested");
        lock(&self.cancel).cancel();
    }

    /// Returns to [`ImportStage::Idle`] after a finished import. Returns
    /// `false` while an import is still under way.
    pub fn acknowledge(&self) -> bool {
        let mut stage = lock(&self.stage);
        if !stage.is_terminal() {
            return *stage == ImportStage::Idle;
        }
        *stage = ImportStage::Idle;
        true
    }

    pub fn pending_batch_count(&self) -> Result<usize> {
        self.pending.count()
    }

    /// Runs [`start`](Self::start) on its own task.
    pub fn spawn(
        self: &Arc<Self>,
        request: ImportRequest,
        observer: Arc<dyn ImportObserver>,
    ) -> JoinHandle<Result<ImportOutcome>> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.start(request, observer.as_ref()).await })
    }

    /// Imports `request.paths`, running the first batch now and deferring the
    /// rest.
    ///
    /// Fails only when the import cannot begin: another import is running,
    /// the root is unusable, or no path names a regular file. Problems with
    /// individual files are reported in the outcome.
    #[instrument(skip_all, fields(paths = request.paths.len(), mode = ?request.options.mode))]
    pub async fn start(&self, request: ImportRequest, observer: &dyn ImportObserver) -> Result<ImportOutcome> {
        let _running = self.claim()?;
        let cancel = self.reset();
        let ImportRequest { paths, options } = request;
        let result = self.start_batches(paths, &options, observer, &cancel).await;
        self.finish(&result, observer);
        result
    }

    async fn start_batches(
        &self,
        paths: Vec<PathBuf>,
        options: &ImportOptions,
        observer: &dyn ImportObserver,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome> {
        self.set_stage(ImportStage::Validation);
        if paths.is_empty() {
            exn::bail!(ErrorKind::NoValidFiles);
        }
        self.files.validate_root(options.root.as_deref(), options.mode)?;

        let mut batches = split_batches(paths, self.settings.batch_size).into_iter();
        let first = batches.next().unwrap_or_default();
        let deferred: Vec<Vec<PathBuf>> = batches.collect();
        let pending = if deferred.is_empty() {
            self.pending.count()?
        } else {
            let count = deferred.len();
            let pending = self.pending.push(deferred)?;
            tracing::info!(deferred = count, pending, "Deferred import batches");
            pending
        };
        self.batches_done.store(0, Ordering::Relaxed);
        let outcome = self.run_batch(first, options, 1, pending, observer, cancel).await?;
        if !outcome.is_cancelled() {
            self.batches_done.store(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    /// Runs the oldest pending batch with `options`. Returns `None` when
    /// nothing is pending.
    ///
    /// The batch leaves the queue only once it has run to an end, completed
    /// or failed, or when none of its files exist any more. A cancelled batch,
    /// one that could not begin, or one interrupted by a crash is run again
    /// by the next call.
    #[instrument(skip_all, fields(mode = ?options.mode))]
    pub async fn process_next_pending(
        &self,
        options: ImportOptions,
        observer: &dyn ImportObserver,
    ) -> Result<Option<ImportOutcome>> {
        let _running = self.claim()?;
        let cancel = self.reset();
        let Some(batch) = self.pending.peek()? else {
            return Ok(None);
        };
        self.set_stage(ImportStage::Validation);
        // Batches queued behind this one.
        let behind = self.pending.count()?.saturating_sub(1);
        let number = self.batches_done.load(Ordering::Relaxed) + 1;
        let mut result = self.run_batch(batch.clone(), &options, number, behind, observer, &cancel).await;
        let settled = match &result {
            Ok(outcome) => !outcome.is_cancelled(),
            Err(e) => matches!(&**e, ErrorKind::NoValidFiles),
        };
        if settled {
            self.batches_done.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.pending.remove(&batch) {
                tracing::error!(error = %*e, "Could not remove finished batch from the queue");
            }
        } else if let Ok(outcome) = &mut result {
            outcome.pending_batches += 1;
        }
        self.finish(&result, observer);
        result.map(Some)
    }

    async fn run_batch(
        &self,
        paths: Vec<PathBuf>,
        options: &ImportOptions,
        batch: usize,
        pending: usize,
        observer: &dyn ImportObserver,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome> {
        self.set_stage(ImportStage::FileDiscovery);
        let mut session =
            self.files.start_session(&paths, options.mode, options.root.as_deref(), self.settings.duplicates)?;
        let mut tracker = Tracker::new(observer, &self.stage, session.files.len(), batch, batch + pending);
        tracker.enter(ImportStage::Hashing);

        let render = options.generate_thumbnails && self.thumbnails.is_some();
        let thumbnails = self.place_files(&mut session, render, &mut tracker, cancel).await;

        if cancel.is_cancelled() {
            let rollback = self.files.rollback_session(&mut session);
            let result = self.files.complete_session(session, false);
            return Ok(ImportOutcome {
                stage: ImportStage::Cancelled,
                result,
                thumbnails: tracker.thumbnails,
                stored: 0,
                already_cataloged: 0,
                duplicates_in_library: 0,
                analyses_queued: 0,
                rollback: Some(rollback),
                pending_batches: pending,
            });
        }

        tracker.enter(ImportStage::DatabaseStorage);
        let catalog = self.store_records(&session, &thumbnails, observer).await;
        let stored = catalog.jobs.len();

        tracker.enter(ImportStage::BackgroundAnalysis);
        if options.queue_analysis {
            for job in catalog.jobs {
                if self.analysis.enqueue(job) {
                    tracker.analyses_queued += 1;
                }
            }
            tracker.emit();
        }

        let processed = session.count(TaskStatus::Completed);
        let failed = session.count(TaskStatus::Failed);
        let stage = if processed == 0 && failed > 0 { ImportStage::Failed } else { ImportStage::Completed };
        let result = self.files.complete_session(session, stage == ImportStage::Completed);
        Ok(ImportOutcome {
            stage,
            result,
            thumbnails: tracker.thumbnails,
            stored,
            already_cataloged: catalog.already_cataloged,
            duplicates_in_library: catalog.duplicates,
            analyses_queued: tracker.analyses_queued,
            rollback: None,
            pending_batches: pending,
        })
    }

    /// Hashes, places and thumbnails every file of `session`. Workers report
    /// back over a channel; this task alone applies their outcomes.
    async fn place_files(
        &self,
        session: &mut ImportSession,
        render: bool,
        tracker: &mut Tracker<'_>,
        cancel: &CancellationToken,
    ) -> HashMap<usize, PathBuf> {
        let context = session.context();
        let jobs: Vec<PathBuf> = session.files.iter().map(|t| t.original_path.clone()).collect();
        let (events, mut inbox) = mpsc::unbounded_channel();
        let workers = self.run_workers(&context, &jobs, render, events, cancel);
        let owner = async {
            let mut thumbnails = HashMap::new();
            while let Some(message) = inbox.recv().await {
                match message {
                    WorkerMessage::Progress(progress) => {
                        session.track(&progress);
                        tracker.file_progress(progress, &jobs[progress.index]);
                    },
                    WorkerMessage::Placed(outcome) => {
                        let path = &jobs[outcome.index];
                        let awaits_thumbnail = render && ready_file(path, &outcome).is_some();
                        tracker.file_placed(&outcome, path, awaits_thumbnail);
                        session.apply(outcome);
                    },
                    WorkerMessage::Thumbnail { index, result } => {
                        tracker.thumbnail_done(index, &jobs[index], &result);
                        if let Ok(done) = result {
                            thumbnails.insert(index, done.path);
                        }
                    },
                }
            }
            thumbnails
        };
        let ((), thumbnails) = join(workers, owner).await;
        thumbnails
    }

    async fn run_workers(
        &self,
        context: &Arc<SessionContext>,
        jobs: &[PathBuf],
        render: bool,
        events: Events,
        cancel: &CancellationToken,
    ) {
        match self.settings.profile {
            ExecutionProfile::Serial => self.serial_worker(context, jobs, render, &events, cancel).await,
            ExecutionProfile::Concurrent => {
                let next = AtomicUsize::new(0);
                let (ready_tx, ready_rx) = mpsc::channel(self.settings.queue_limit.max(1));
                let ready_rx = tokio::sync::Mutex::new(ready_rx);
                let ready = render.then_some(ready_tx);
                let preparers: Vec<_> = (0..self.settings.preparation_workers.max(1))
                    .map(|_| self.prepare_worker(context, jobs, &next, ready.clone(), &events, cancel))
                    .collect();
                // Thumbnail workers stop once every preparer has dropped its sender.
                drop(ready);
                let thumbnailers: Vec<_> = if render {
                    (0..self.settings.thumbnail_workers.max(1))
                        .map(|_| self.thumbnail_worker(&ready_rx, &events, cancel))
                        .collect()
                } else {
                    Vec::new()
                };
                tracing::debug!(preparers = preparers.len(), thumbnailers = thumbnailers.len(), "Starting import workers");
                join(join_all(preparers), join_all(thumbnailers)).await;
            },
        }
    }

    async fn serial_worker(
        &self,
        context: &Arc<SessionContext>,
        jobs: &[PathBuf],
        render: bool,
        events: &Events,
        cancel: &CancellationToken,
    ) {
        for (index, path) in jobs.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.prepare(context, index, path, events, cancel).await;
            let ready = if render { ready_file(path, &outcome) } else { None };
            let _ = events.send(WorkerMessage::Placed(outcome));
            if let Some(file) = ready
                && !cancel.is_cancelled()
            {
                let result = self.thumbnail(&file).await;
                let _ = events.send(WorkerMessage::Thumbnail { index, result });
            }
        }
    }

    async fn prepare_worker(
        &self,
        context: &Arc<SessionContext>,
        jobs: &[PathBuf],
        next: &AtomicUsize,
        ready: Option<mpsc::Sender<ReadyFile>>,
        events: &Events,
        cancel: &CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let index = next.fetch_add(1, Ordering::Relaxed);
            let Some(path) = jobs.get(index) else {
                break;
            };
            let outcome = self.prepare(context, index, path, events, cancel).await;
            let file = ready.as_ref().and_then(|_| ready_file(path, &outcome));
            let _ = events.send(WorkerMessage::Placed(outcome));
            if let (Some(queue), Some(file)) = (&ready, file) {
                // Waits while the queue is full.
                if queue.send(file).await.is_err() {
                    break;
                }
            }
        }
    }

    async fn thumbnail_worker(
        &self,
        ready: &tokio::sync::Mutex<mpsc::Receiver<ReadyFile>>,
        events: &Events,
        cancel: &CancellationToken,
    ) {
        loop {
            let next = ready.lock().await.recv().await;
            let Some(file) = next else {
                break;
            };
            // Keep draining so no preparer stays blocked on a full queue.
            if cancel.is_cancelled() {
                continue;
            }
            let result = self.thumbnail(&file).await;
            let _ = events.send(WorkerMessage::Thumbnail { index: file.index, result });
        }
    }

    async fn prepare(
        &self,
        context: &Arc<SessionContext>,
        index: usize,
        path: &Path,
        events: &Events,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let progress = events.clone();
        let report = move |p: FileProgress| {
            let _ = progress.send(WorkerMessage::Progress(p));
        };
        self.files.prepare_file(context, index, path.to_path_buf(), report, cancel).await
    }

    /// Registers the image shipped next to the model when there is a valid
    /// one, and renders the placed model otherwise.
    async fn thumbnail(&self, file: &ReadyFile) -> std::result::Result<ThumbnailDone, String> {
        let Some(service) = &self.thumbnails else {
            return Err("thumbnail generation is not configured".to_string());
        };
        let original = file.original.clone();
        let paired = tokio::task::spawn_blocking(move || find_paired_image(&original)).await.ok().flatten();
        let result = match &paired {
            Some(image) => service.register_existing(&file.hash, image).await,
            None => service.generate(&file.model, &file.hash, &self.settings.render, false).await,
        };
        match result {
            Ok(thumbnail) => {
                let kind = match (thumbnail.cached, paired.is_some()) {
                    (true, _) => ThumbnailKind::Cached,
                    (false, true) => ThumbnailKind::Registered,
                    (false, false) => ThumbnailKind::Generated,
                };
                Ok(ThumbnailDone { path: thumbnail.path, kind })
            },
            Err(e) => {
                tracing::warn!(path = %file.original.display(), error = %*e, "Could not create thumbnail");
                Err((*e).to_string())
            },
        }
    }

    async fn store_records(
        &self,
        session: &ImportSession,
        thumbnails: &HashMap<usize, PathBuf>,
        observer: &dyn ImportObserver,
    ) -> CatalogReport {
        let mut report = CatalogReport::default();
        for (index, task) in session.files.iter().enumerate() {
            if task.status != TaskStatus::Completed {
                continue;
            }
            let (Some(managed), Some(hash)) = (&task.managed_path, &task.content_hash) else {
                continue;
            };
            let model = NewModel {
                name: task.original_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
                original_path: task.original_path.clone(),
                managed_path: managed.clone(),
                content_hash: hash.clone(),
                size: task.file_size,
                category: category_folder(&task.original_path).to_string(),
                thumbnail: thumbnails.get(&index).cloned(),
            };
            if let Err(e) = self.store_record(model, observer, &mut report).await {
                tracing::warn!(path = %managed.display(), error = %*e, "Could not record model in catalog");
            }
        }
        tracing::info!(
            stored = report.jobs.len(),
            already_cataloged = report.already_cataloged,
            duplicates = report.duplicates,
            "Catalog updated"
        );
        report
    }

    async fn store_record(
        &self,
        model: NewModel,
        observer: &dyn ImportObserver,
        report: &mut CatalogReport,
    ) -> Result<()> {
        if let Some(existing) = self.store.find_by_path(&model.managed_path).await.or_raise(|| ErrorKind::Catalog)? {
            if existing.thumbnail.is_none()
                && let Some(thumbnail) = &model.thumbnail
            {
                self.store.set_thumbnail(existing.id, thumbnail).await.or_raise(|| ErrorKind::Catalog)?;
            }
            report.already_cataloged += 1;
            return Ok(());
        }
        let duplicates = self.store.find_duplicates(&model.content_hash).await.or_raise(|| ErrorKind::Catalog)?;
        if let Some(existing) = duplicates.into_iter().next() {
            tracing::warn!(
                path = %model.original_path.display(),
                existing = %existing.managed_path.display(),
                "Content is already in the library"
            );
            report.duplicates += 1;
            observer.on_event(ImportEvent::DuplicateInLibrary {
                path: model.original_path.clone(),
                existing: existing.managed_path,
            });
        }
        let model_id = self.store.store(&model).await.or_raise(|| ErrorKind::Catalog)?;
        report.jobs.push(AnalysisJob { model_id, path: model.managed_path, content_hash: model.content_hash });
        Ok(())
    }

    fn claim(&self) -> Result<Running<'_>> {
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            exn::bail!(ErrorKind::ImportRunning);
        }
        Ok(Running(&self.running))
    }

    /// Installs a fresh token for the import about to run.
    fn reset(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();
        token
    }

    fn set_stage(&self, stage: ImportStage) {
        *lock(&self.stage) = stage;
    }

    fn finish(&self, result: &Result<ImportOutcome>, observer: &dyn ImportObserver) {
        let stage = match result {
            Ok(outcome) => outcome.stage,
            Err(e) => {
                tracing::warn!(error = %**e, "Import could not run");
                ImportStage::Failed
            },
        };
        self.set_stage(stage);
        observer.on_event(ImportEvent::Finished(stage));
    }
}

/// Clears the running flag when the import ends, however it ends.
struct Running<'a>(&'a AtomicBool);
impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type Events = mpsc::UnboundedSender<WorkerMessage>;

enum WorkerMessage {
    Progress(FileProgress),
    Placed(FileOutcome),
    Thumbnail { index: usize, result: std::result::Result<ThumbnailDone, String> },
}

/// A placed model waiting for its thumbnail.
struct ReadyFile {
    index: usize,
    model: PathBuf,
    original: PathBuf,
    hash: String,
}

enum ThumbnailKind {
    Generated,
    Cached,
    Registered,
}

struct ThumbnailDone {
    path: PathBuf,
    kind: ThumbnailKind,
}

#[derive(Default)]
struct CatalogReport {
    jobs: Vec<AnalysisJob>,
    already_cataloged: usize,
    duplicates: usize,
}

/// Only successfully placed models get thumbnails.
fn ready_file(path: &Path, outcome: &FileOutcome) -> Option<ReadyFile> {
    if outcome.status != TaskStatus::Completed || FileClass::of(path) != FileClass::Model {
        return None;
    }
    Some(ReadyFile {
        index: outcome.index,
        model: outcome.managed_path.clone()?,
        original: path.to_path_buf(),
        hash: outcome.content_hash.clone()?,
    })
}

/// Folds worker reports into [`ImportProgress`] snapshots.
struct Tracker<'a> {
    observer: &'a dyn ImportObserver,
    slot: &'a Mutex<ImportStage>,
    stage: ImportStage,
    started: Instant,
    total: usize,
    batch: usize,
    batches: usize,
    /// Files with nothing left to do.
    done: usize,
    /// Share of the file currently reporting progress.
    partial: f32,
    current: Option<(usize, String)>,
    hashed: usize,
    /// Placed files whose thumbnail is outstanding.
    awaiting: HashSet<usize>,
    thumbnails: ThumbnailCounts,
    analyses_queued: usize,
}
impl<'a> Tracker<'a> {
    fn new(
        observer: &'a dyn ImportObserver,
        slot: &'a Mutex<ImportStage>,
        total: usize,
        batch: usize,
        batches: usize,
    ) -> Self {
        Self {
            observer,
            slot,
            stage: *lock(slot),
            started: Instant::now(),
            total,
            batch,
            batches,
            done: 0,
            partial: 0.0,
            current: None,
            hashed: 0,
            awaiting: HashSet::new(),
            thumbnails: ThumbnailCounts::default(),
            analyses_queued: 0,
        }
    }

    fn enter(&mut self, stage: ImportStage) {
        self.switch(stage);
        self.emit();
    }

    fn switch(&mut self, stage: ImportStage) {
        if self.stage != stage {
            self.stage = stage;
            *lock(self.slot) = stage;
        }
    }

    fn file_progress(&mut self, progress: FileProgress, path: &Path) {
        let (stage, partial) = match progress.stage {
            FileStage::Hashing => (ImportStage::Hashing, progress.percent / 200.0),
            FileStage::Copying => (ImportStage::FileManagement, 0.5 + progress.percent / 200.0),
        };
        self.switch(stage);
        self.partial = partial.clamp(0.0, 1.0);
        self.current = Some((progress.index, file_name(path)));
        self.emit();
    }

    fn file_placed(&mut self, outcome: &FileOutcome, path: &Path, awaits_thumbnail: bool) {
        if outcome.content_hash.is_some() {
            self.hashed += 1;
        }
        if awaits_thumbnail {
            self.awaiting.insert(outcome.index);
        } else {
            self.done += 1;
        }
        self.partial = 0.0;
        self.current = Some((outcome.index, file_name(path)));
        self.emit();
    }

    fn thumbnail_done(&mut self, index: usize, path: &Path, result: &std::result::Result<ThumbnailDone, String>) {
        self.switch(ImportStage::ThumbnailGeneration);
        match result {
            Ok(ThumbnailDone { kind: ThumbnailKind::Generated, .. }) => self.thumbnails.generated += 1,
            Ok(ThumbnailDone { kind: ThumbnailKind::Cached, .. }) => self.thumbnails.cached += 1,
            Ok(ThumbnailDone { kind: ThumbnailKind::Registered, .. }) => self.thumbnails.registered += 1,
            Err(_) => self.thumbnails.failed += 1,
        }
        if self.awaiting.remove(&index) {
            self.done += 1;
        }
        self.current = Some((index, file_name(path)));
        self.emit();
    }

    fn emit(&self) {
        self.observer.on_event(ImportEvent::Progress(self.snapshot()));
    }

    fn snapshot(&self) -> ImportProgress {
        let percent = match self.total {
            0 => 100.0,
            total => ((self.done as f32 + self.partial) / total as f32 * 100.0).min(100.0),
        };
        let elapsed = self.started.elapsed();
        let remaining = match self.done {
            0 => None,
            done if done >= self.total => Some(Duration::ZERO),
            done => Some(elapsed.mul_f64((self.total - done) as f64 / done as f64)),
        };
        ImportProgress {
            stage: self.stage,
            percent,
            current_file: self.current.as_ref().map(|(_, name)| name.clone()),
            current_index: self.current.as_ref().map(|(index, _)| *index),
            total_files: self.total,
            files_hashed: self.hashed,
            thumbnails_generated: self.thumbnails.total(),
            analyses_queued: self.analyses_queued,
            elapsed,
            remaining,
            batch: self.batch,
            batches: self.batches,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
