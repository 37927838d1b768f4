//! The interactive import pipeline.
//!
//! [`ImportCoordinator`] takes any number of files and drives them, one
//! bounded batch at a time, through placement ([`FileManager`]), thumbnails
//! ([`ThumbnailService`]), the catalog ([`ModelStore`]) and finally the
//! background [`AnalysisQueue`]. Progress is reported to an
//! [`ImportObserver`] as [`ImportEvent`]s.
//!
//! [`FileManager`]: crate::session::FileManager
//! [`ThumbnailService`]: meshvault_thumbnail::ThumbnailService
//! [`ModelStore`]: meshvault_catalog::ModelStore

mod analysis;
mod batches;
mod coordinator;
mod models;

pub use self::analysis::{AnalysisJob, AnalysisQueue, ChannelAnalysisQueue, NoAnalysis};
pub use self::batches::{PendingBatchStore, split_batches};
pub use self::coordinator::{CoordinatorSettings, ImportCoordinator};
pub use self::models::{
    ImportEvent, ImportObserver, ImportOptions, ImportOutcome, ImportProgress, ImportRequest, ImportStage,
    NullObserver, ThumbnailCounts,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::{FileManager, RootRegistry, TaskStatus};
    use crate::template::DEFAULT_TEMPLATE;
    use futures::FutureExt;
    use meshvault_catalog::{MemoryStore, StoreHandle};
    use meshvault_config::{DuplicatePolicy, ExecutionProfile, FileMode, StateStore};
    use meshvault_thumbnail::{RenderOptions, Renderer, ThumbnailService};
    use rstest::rstest;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    struct CountingRenderer(Arc<AtomicUsize>);
    impl Renderer for CountingRenderer {
        fn render_to(
            &self,
            _model: &Path,
            options: &RenderOptions,
            save_to: &Path,
        ) -> meshvault_thumbnail::error::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            image::RgbImage::new(options.size, options.size).save(save_to).unwrap();
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        state: Arc<StateStore>,
        store: Arc<MemoryStore>,
        renders: Arc<AtomicUsize>,
    }
    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("source")).unwrap();
            fs::create_dir_all(dir.path().join("library")).unwrap();
            let state = Arc::new(StateStore::open(dir.path().join("state")).unwrap());
            Self { dir, state, store: Arc::new(MemoryStore::new()), renders: Arc::default() }
        }

        fn library(&self) -> PathBuf {
            self.dir.path().join("library")
        }

        fn write(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.dir.path().join("source").join(name);
            fs::write(&path, content).unwrap();
            path
        }

        fn thumbnails(&self) -> Arc<ThumbnailService> {
            let renderer = Arc::new(CountingRenderer(Arc::clone(&self.renders)));
            Arc::new(ThumbnailService::new(self.dir.path().join("thumbs"), renderer, &[64, 16]).unwrap())
        }

        fn coordinator(&self, profile: ExecutionProfile) -> ImportCoordinator {
            let registry = Arc::clone(&self.state) as Arc<dyn RootRegistry>;
            let files = Arc::new(FileManager::new(registry, DEFAULT_TEMPLATE.parse().unwrap()));
            let settings = CoordinatorSettings {
                profile,
                batch_size: 500,
                preparation_workers: 3,
                thumbnail_workers: 2,
                queue_limit: 1,
                duplicates: DuplicatePolicy::KeepBoth,
                render: RenderOptions::default(),
            };
            let store = Arc::clone(&self.store) as StoreHandle;
            ImportCoordinator::new(files, store, Arc::clone(&self.state) as Arc<dyn PendingBatchStore>, settings)
        }

        fn organized(&self, paths: Vec<PathBuf>) -> ImportRequest {
            ImportRequest { paths, options: ImportOptions::new(FileMode::KeepOrganized, Some(self.library())) }
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ImportEvent>) -> Vec<ImportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[rstest]
    #[case(ExecutionProfile::Serial)]
    #[case(ExecutionProfile::Concurrent)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_small_import_is_placed_thumbnailed_and_cataloged(#[case] profile: ExecutionProfile) {
        let fx = Fixture::new();
        let paths = vec![fx.write("a.stl", b"solid a"), fx.write("b.stl", b"solid b"), fx.write("c.png", b"png")];
        let coordinator = fx.coordinator(profile).with_thumbnails(fx.thumbnails());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = coordinator.start(fx.organized(paths), &tx).await.unwrap();
        assert_eq!(outcome.stage, ImportStage::Completed);
        assert!(outcome.result.success);
        assert_eq!(outcome.result.processed_files, 3);
        assert_eq!(outcome.pending_batches, 0);
        assert_eq!(outcome.stored, 3);
        assert_eq!(outcome.thumbnails.generated, 2);
        assert_eq!(fx.renders.load(Ordering::SeqCst), 2);

        for task in &outcome.result.tasks {
            let managed = task.managed_path.as_ref().unwrap();
            let folder = if task.original_path.extension().unwrap() == "stl" { "STL_Files" } else { "Other_Files" };
            assert!(managed.starts_with(fx.library().join(folder)));
            assert_eq!(fs::metadata(managed).unwrap().len(), task.file_size);
        }
        let records = fx.store.all().await;
        assert_eq!(records.iter().filter(|r| r.thumbnail.is_some()).count(), 2);

        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&ImportEvent::Finished(ImportStage::Completed)));
        let last_progress = events
            .iter()
            .rev()
            .find_map(|e| match e {
                ImportEvent::Progress(p) => Some(p.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress.percent, 100.0);
        assert_eq!(last_progress.files_hashed, 3);
        assert_eq!(last_progress.thumbnails_generated, 2);
        assert_eq!(coordinator.stage(), ImportStage::Completed);
        assert!(coordinator.acknowledge());
        assert_eq!(coordinator.stage(), ImportStage::Idle);
    }

    #[tokio::test]
    async fn test_oversized_request_defers_batches() {
        let fx = Fixture::new();
        let paths: Vec<PathBuf> = (0..600).map(|i| fx.write(&format!("{i}.stl"), format!("solid {i}").as_bytes())).collect();
        let coordinator = fx.coordinator(ExecutionProfile::Concurrent);
        let options = ImportOptions {
            mode: FileMode::LeaveInPlace,
            root: None,
            generate_thumbnails: false,
            queue_analysis: false,
        };

        let request = ImportRequest { paths: paths.clone(), options: options.clone() };
        let outcome = coordinator.start(request, &NullObserver).await.unwrap();
        assert_eq!(outcome.result.total_files, 500);
        assert_eq!(outcome.pending_batches, 1);
        let pending = fx.state.pending_batches().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], paths[500..]);
        // Files referenced in place are never touched.
        assert!(outcome.result.tasks.iter().all(|t| t.managed_path.as_ref() == Some(&t.original_path)));

        let next = coordinator.process_next_pending(options.clone(), &NullObserver).await.unwrap().unwrap();
        assert_eq!(next.result.total_files, 100);
        assert_eq!(next.pending_batches, 0);
        assert_eq!(coordinator.pending_batch_count().unwrap(), 0);
        assert!(coordinator.process_next_pending(options, &NullObserver).await.unwrap().is_none());
        assert_eq!(fx.store.len().await, 600);
    }

    struct CancelAfter {
        coordinator: Arc<ImportCoordinator>,
        files: usize,
    }
    impl ImportObserver for CancelAfter {
        fn on_event(&self, event: ImportEvent) {
            if let ImportEvent::Progress(p) = event
                && p.files_hashed >= self.files
            {
                self.coordinator.cancel();
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_rolls_back_the_batch() {
        let fx = Fixture::new();
        let paths: Vec<PathBuf> = (0..5).map(|i| fx.write(&format!("{i}.stl"), format!("solid {i}").as_bytes())).collect();
        let coordinator = Arc::new(fx.coordinator(ExecutionProfile::Serial));
        let observer = CancelAfter { coordinator: Arc::clone(&coordinator), files: 2 };

        let outcome = coordinator.start(fx.organized(paths.clone()), &observer).await.unwrap();
        assert!(outcome.is_cancelled());
        assert!(!outcome.result.success);
        assert!(outcome.rollback.as_ref().unwrap().is_clean());
        assert!(outcome.rollback.unwrap().removed_files >= 2);
        assert_eq!(fs::read_dir(fx.library()).unwrap().count(), 0);
        assert!(paths.iter().all(|p| p.exists()));
        assert!(fx.store.is_empty().await);
        assert_eq!(coordinator.stage(), ImportStage::Cancelled);
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_cancelled_resume_keeps_the_batch_queued() {
        let fx = Fixture::new();
        let paths: Vec<PathBuf> = (0..3).map(|i| fx.write(&format!("{i}.stl"), format!("solid {i}").as_bytes())).collect();
        fx.state.push_pending_batches(vec![paths.clone()]).unwrap();
        let coordinator = Arc::new(fx.coordinator(ExecutionProfile::Serial));
        let observer = CancelAfter { coordinator: Arc::clone(&coordinator), files: 1 };
        let options = ImportOptions::new(FileMode::KeepOrganized, Some(fx.library()));

        let cancelled = coordinator.process_next_pending(options.clone(), &observer).await.unwrap().unwrap();
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.pending_batches, 1);
        assert_eq!(fx.state.pending_batches().unwrap(), vec![paths.clone()]);
        assert_eq!(fs::read_dir(fx.library()).unwrap().count(), 0);

        let resumed = coordinator.process_next_pending(options, &NullObserver).await.unwrap().unwrap();
        assert_eq!(resumed.stage, ImportStage::Completed);
        assert_eq!(resumed.result.processed_files, 3);
        assert_eq!(resumed.pending_batches, 0);
        assert!(fx.state.pending_batches().unwrap().is_empty());
        assert_eq!(fx.store.len().await, 3);
    }

    #[tokio::test]
    async fn test_progress_carries_the_batch_position() {
        let fx = Fixture::new();
        let first = fx.write("a.stl", b"solid a");
        let second = fx.write("b.stl", b"solid b");
        fx.state.push_pending_batches(vec![vec![first], vec![second]]).unwrap();
        let coordinator = fx.coordinator(ExecutionProfile::Serial);
        let options = ImportOptions {
            mode: FileMode::LeaveInPlace,
            root: None,
            generate_thumbnails: false,
            queue_analysis: false,
        };

        for expected in [(1, 2), (2, 2)] {
            let (tx, mut rx) = mpsc::unbounded_channel();
            coordinator.process_next_pending(options.clone(), &tx).await.unwrap().unwrap();
            let positions: Vec<(usize, usize)> = drain(&mut rx)
                .into_iter()
                .filter_map(|e| match e {
                    ImportEvent::Progress(p) => Some((p.batch, p.batches)),
                    _ => None,
                })
                .collect();
            assert!(!positions.is_empty());
            assert!(positions.iter().all(|p| *p == expected), "{positions:?}");
        }
    }

    struct StartAgain {
        coordinator: Arc<ImportCoordinator>,
        request: ImportRequest,
        rejected: Mutex<Vec<bool>>,
    }
    impl ImportObserver for StartAgain {
        fn on_event(&self, _event: ImportEvent) {
            let again = self.coordinator.start(self.request.clone(), &NullObserver).now_or_never();
            let rejected = matches!(again, Some(Err(e)) if matches!(&*e, ErrorKind::ImportRunning));
            self.rejected.lock().unwrap().push(rejected);
        }
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let fx = Fixture::new();
        let request = fx.organized(vec![fx.write("a.stl", b"solid")]);
        let coordinator = Arc::new(fx.coordinator(ExecutionProfile::Serial));
        let observer =
            StartAgain { coordinator: Arc::clone(&coordinator), request: request.clone(), rejected: Mutex::default() };

        coordinator.start(request, &observer).await.unwrap();
        let rejected = observer.rejected.lock().unwrap();
        assert!(!rejected.is_empty());
        assert!(rejected.iter().all(|r| *r));
    }

    #[tokio::test]
    async fn test_paired_image_is_registered_instead_of_rendered() {
        let fx = Fixture::new();
        let model = fx.write("model.stl", b"solid model");
        image::RgbImage::new(32, 32).save(fx.dir.path().join("source/model_thumb.png")).unwrap();
        let service = fx.thumbnails();
        let coordinator = fx.coordinator(ExecutionProfile::Concurrent).with_thumbnails(Arc::clone(&service));

        let outcome = coordinator.start(fx.organized(vec![model]), &NullObserver).await.unwrap();
        assert_eq!(outcome.thumbnails.registered, 1);
        assert_eq!(outcome.thumbnails.generated, 0);
        assert_eq!(fx.renders.load(Ordering::SeqCst), 0);
        let hash = outcome.result.tasks[0].content_hash.clone().unwrap();
        assert!(service.is_cached(&hash));
        assert_eq!(fx.store.all().await[0].thumbnail, Some(service.canonical_path(&hash)));
    }

    #[tokio::test]
    async fn test_known_content_is_reported_and_analysis_queued() {
        let fx = Fixture::new();
        let first = fx.write("a.stl", b"solid same");
        let second = fx.write("b.stl", b"solid same");
        let (queue, mut jobs) = ChannelAnalysisQueue::new();
        let coordinator = fx.coordinator(ExecutionProfile::Serial).with_analysis(Arc::new(queue));

        let outcome = coordinator.start(fx.organized(vec![first]), &NullObserver).await.unwrap();
        assert_eq!(outcome.analyses_queued, 1);
        assert_eq!(outcome.duplicates_in_library, 0);
        assert!(coordinator.acknowledge());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = coordinator.start(fx.organized(vec![second]), &tx).await.unwrap();
        assert_eq!(outcome.duplicates_in_library, 1);
        assert_eq!(outcome.stored, 1);
        assert!(drain(&mut rx).iter().any(|e| matches!(e, ImportEvent::DuplicateInLibrary { .. })));

        let mut queued = Vec::new();
        while let Ok(job) = jobs.try_recv() {
            queued.push(job);
        }
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].content_hash, queued[1].content_hash);
    }

    #[tokio::test]
    async fn test_preconditions_fail_before_any_work() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(ExecutionProfile::Serial);

        let missing_root = ImportRequest {
            paths: vec![fx.write("a.stl", b"solid")],
            options: ImportOptions::new(FileMode::KeepOrganized, None),
        };
        let err = coordinator.start(missing_root, &NullObserver).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingRoot));
        assert_eq!(coordinator.stage(), ImportStage::Failed);
        assert!(!coordinator.is_running());

        let nothing = fx.organized(vec![fx.dir.path().join("source/missing.stl")]);
        let err = coordinator.start(nothing, &NullObserver).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoValidFiles));
        assert_eq!(coordinator.pending_batch_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_all_files_failing_fails_the_batch() {
        let fx = Fixture::new();
        let path = fx.write("a.stl", b"solid");
        let coordinator = fx.coordinator(ExecutionProfile::Serial);
        let library = fx.library();
        // A file where the category folder should go makes placement fail.
        fs::write(library.join("STL_Files"), b"in the way").unwrap();

        let outcome = coordinator.start(fx.organized(vec![path]), &NullObserver).await.unwrap();
        assert_eq!(outcome.stage, ImportStage::Failed);
        assert_eq!(outcome.result.tasks[0].status, TaskStatus::Failed);
        assert_eq!(outcome.stored, 0);
    }
}
