//! Composition root: the only place that decides which concrete store,
//! renderer and state backend the pipeline runs with.

use crate::cli::PlacementArgs;
use meshvault_catalog::{Database, Repository, StoreHandle};
use meshvault_config::{Config, FileMode, StateStore};
use meshvault_library::PathGenerator;
use meshvault_library::import::{CoordinatorSettings, ImportCoordinator, ImportOptions, PendingBatchStore};
use meshvault_library::session::{FileManager, RootRegistry};
use meshvault_thumbnail::{F3dRenderer, ThumbnailService};
use std::path::PathBuf;
use std::sync::Arc;

/// Renders an error tree (with locations) for the terminal.
pub fn report<E>(err: exn::Exn<E>) -> miette::Report
where
    E: std::error::Error + Send + Sync + 'static,
{
    miette::miette!("{err:?}")
}

pub struct App {
    pub config: Config,
    pub state: Arc<StateStore>,
}
impl App {
    pub fn new(config: Config) -> miette::Result<Self> {
        let dir = config.state_dir().map_err(report)?;
        let state = StateStore::open(dir).map_err(report)?;
        Ok(Self { config, state: Arc::new(state) })
    }

    pub async fn database(&self) -> miette::Result<Database> {
        let path = self.config.database_path().map_err(report)?;
        tracing::debug!(path = %path.display(), "Opening catalog");
        Database::connect(path).await.map_err(report)
    }

    /// The explicit root, or the first configured one.
    pub fn root(&self, explicit: Option<PathBuf>) -> Option<PathBuf> {
        explicit.or_else(|| self.config.library.roots.first().cloned())
    }

    pub fn import_options(&self, args: PlacementArgs) -> ImportOptions {
        let mode = if args.in_place { FileMode::LeaveInPlace } else { self.config.library.mode };
        let root = match mode {
            FileMode::KeepOrganized => self.root(args.root),
            FileMode::LeaveInPlace => None,
        };
        ImportOptions {
            mode,
            root,
            generate_thumbnails: self.config.import.generate_thumbnails && !args.no_thumbnails,
            queue_analysis: self.config.import.queue_analysis,
        }
    }

    fn file_manager(&self) -> miette::Result<FileManager> {
        let names: PathGenerator = self.config.library.filename_template.parse().map_err(report)?;
        let registry = Arc::clone(&self.state) as Arc<dyn RootRegistry>;
        Ok(FileManager::new(registry, names)
            .with_chunk_size(self.config.import.chunk_size)
            .with_configured_roots(self.config.library.roots.iter().cloned()))
    }

    /// The configured renderer, or one found on the system. `None` disables
    /// rendering.
    pub fn renderer(&self) -> Option<F3dRenderer> {
        match self.find_renderer() {
            Ok(renderer) => Some(renderer),
            Err(e) => {
                tracing::warn!(error = %*e, "No thumbnail renderer available; thumbnails are disabled");
                None
            },
        }
    }

    fn find_renderer(&self) -> meshvault_thumbnail::error::Result<F3dRenderer> {
        match &self.config.thumbnails.renderer {
            Some(path) => F3dRenderer::with_executable(path),
            None => F3dRenderer::discover(),
        }
    }

    pub fn thumbnails(&self, renderer: F3dRenderer) -> miette::Result<Arc<ThumbnailService>> {
        let dir = self.config.thumbnail_dir().map_err(report)?;
        let service = ThumbnailService::new(dir, Arc::new(renderer), &self.config.thumbnails.sizes).map_err(report)?;
        Ok(Arc::new(service))
    }

    /// The cache for work that never renders, such as registering existing
    /// images or removing orphans.
    pub fn thumbnail_cache(&self) -> miette::Result<Arc<ThumbnailService>> {
        let renderer = self.find_renderer().unwrap_or(F3dRenderer::Binary { path: PathBuf::from("f3d") });
        self.thumbnails(renderer)
    }

    pub fn coordinator(&self, database: &Database, render: bool) -> miette::Result<ImportCoordinator> {
        let store: StoreHandle = Arc::new(Repository::from(database));
        let pending = Arc::clone(&self.state) as Arc<dyn PendingBatchStore>;
        let settings = CoordinatorSettings::from_config(&self.config);
        let coordinator = ImportCoordinator::new(Arc::new(self.file_manager()?), store, pending, settings);
        match render.then(|| self.renderer()).flatten() {
            Some(renderer) => Ok(coordinator.with_thumbnails(self.thumbnails(renderer)?)),
            None => Ok(coordinator),
        }
    }
}
