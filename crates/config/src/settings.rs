//! Layered application configuration.
//!
//! Values are resolved in order, later layers overriding earlier ones:
//!
//! 1. built-in defaults,
//! 2. `meshvault.toml` in the platform configuration directory (or the file
//!    passed explicitly),
//! 3. `MESHVAULT_*` environment variables, with `__` separating nested keys
//!    (`MESHVAULT_IMPORT__BATCH_SIZE=100`).

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_QUEUE_LIMIT: usize = 32;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_THUMBNAIL_SIZES: [u32; 3] = [1280, 512, 128];
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{{ hash }}";
/// Upper bound for automatically sized preparation pools.
pub const MAX_PREPARATION_WORKERS: usize = 8;

const ENV_PREFIX: &str = "MESHVAULT_";
const CONFIG_FILE: &str = "meshvault.toml";

/// How imported files are placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileMode {
    /// Copy into `root/<category>/` under a managed name.
    #[default]
    KeepOrganized,
    /// Reference files where they already are.
    LeaveInPlace,
}

/// What to do with a file whose content hash was already seen in the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Import it anyway; it is counted as a duplicate.
    #[default]
    KeepBoth,
    /// Mark it skipped.
    SkipDuplicates,
}

/// How the per-file stages of an import are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionProfile {
    /// One worker drains the batch in order.
    Serial,
    /// Preparation workers feed a bounded queue drained by thumbnail workers.
    #[default]
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directories that may receive organized imports.
    pub roots: Vec<PathBuf>,
    pub mode: FileMode,
    pub duplicates: DuplicatePolicy,
    /// `upon` template for managed file names (without extension).
    pub filename_template: String,
}
impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            mode: FileMode::default(),
            duplicates: DuplicatePolicy::default(),
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub profile: ExecutionProfile,
    /// Hash and placement workers; derived from the CPU count when unset.
    pub preparation_workers: Option<usize>,
    /// Thumbnail workers; always fewer than preparation workers when possible.
    pub thumbnail_workers: Option<usize>,
    /// Capacity of the queue between preparation and thumbnail workers.
    pub queue_limit: usize,
    /// Read size used by hashing and copying.
    pub chunk_size: usize,
    pub generate_thumbnails: bool,
    pub queue_analysis: bool,
}
impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            profile: ExecutionProfile::default(),
            preparation_workers: None,
            thumbnail_workers: None,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            generate_thumbnails: true,
            queue_analysis: true,
        }
    }
}
impl ImportConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn queue_limit(&self) -> usize {
        self.queue_limit.max(1)
    }

    /// Number of preparation workers (`N`).
    pub fn preparation_workers(&self) -> usize {
        match self.preparation_workers {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
                .min(MAX_PREPARATION_WORKERS),
        }
    }

    /// Number of thumbnail workers (`M`), kept below `N` unless `N` is one.
    pub fn thumbnail_workers(&self) -> usize {
        let preparation = self.preparation_workers();
        let ceiling = preparation.saturating_sub(1).max(1);
        match self.thumbnail_workers {
            Some(m) => m.clamp(1, ceiling),
            None => (preparation / 4).clamp(1, ceiling),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Cache directory; defaults to the platform cache directory.
    pub directory: Option<PathBuf>,
    /// Output sizes in pixels. The largest is rendered, the rest are resized from it.
    pub sizes: Vec<u32>,
    pub material: Option<String>,
    pub background: Option<String>,
    /// Explicit renderer executable; discovered on `PATH` when unset.
    pub renderer: Option<PathBuf>,
}
impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            directory: None,
            sizes: DEFAULT_THUMBNAIL_SIZES.to_vec(),
            material: None,
            background: None,
            renderer: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub database: Option<PathBuf>,
    /// Directory holding persisted pipeline state (pending batches, policies).
    pub state: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub import: ImportConfig,
    pub thumbnails: ThumbnailConfig,
    pub paths: PathsConfig,
}
impl Config {
    /// Load configuration from defaults, a TOML file and the environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = match path {
            Some(p) => {
                if !p.is_file() {
                    exn::bail!(ErrorKind::FileNotFound(p.to_path_buf()));
                }
                Self::figment(Some(p))
            },
            None => Self::figment(Self::default_file().as_deref()),
        };
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Defaults merged with an optional TOML file, without the environment layer.
    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        match file {
            Some(file) => figment.merge(Toml::file(file)),
            None => figment,
        }
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        tracing::debug!(
            batch_size = config.import.batch_size,
            profile = ?config.import.profile,
            roots = config.library.roots.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// `meshvault.toml` in the platform configuration directory.
    pub fn default_file() -> Option<PathBuf> {
        project_dirs().ok().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.paths.database {
            Some(p) => Ok(p.clone()),
            None => Ok(project_dirs()?.data_dir().join("library.sqlite")),
        }
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.paths.state {
            Some(p) => Ok(p.clone()),
            None => Ok(project_dirs()?.data_dir().join("state")),
        }
    }

    pub fn thumbnail_dir(&self) -> Result<PathBuf> {
        match &self.thumbnails.directory {
            Some(p) => Ok(p.clone()),
            None => Ok(project_dirs()?.cache_dir().join("thumbnails")),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "meshvault").ok_or_raise(|| ErrorKind::NoProjectDirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_figment(Config::figment(None)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.import.batch_size, 500);
        assert_eq!(config.thumbnails.sizes, vec![1280, 512, 128]);
        assert_eq!(config.library.mode, FileMode::KeepOrganized);
        assert_eq!(config.library.filename_template, "{{ hash }}");
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [library]
            roots = ["/srv/models"]
            mode = "leave-in-place"

            [import]
            batch_size = 100
            profile = "serial"
            "#
        )
        .unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.library.roots, vec![PathBuf::from("/srv/models")]);
        assert_eq!(config.library.mode, FileMode::LeaveInPlace);
        assert_eq!(config.import.batch_size, 100);
        assert_eq!(config.import.profile, ExecutionProfile::Serial);
        // Untouched values keep their defaults.
        assert_eq!(config.import.queue_limit, DEFAULT_QUEUE_LIMIT);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileNotFound(_)));
    }

    #[test]
    fn test_invalid_types_are_rejected() {
        let figment = Config::figment(None).merge(Serialized::default("import.batch_size", "lots"));
        let err = Config::from_figment(figment).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid));
    }

    #[rstest]
    #[case(Some(8), None, 8, 2)]
    #[case(Some(8), Some(20), 8, 7)]
    #[case(Some(4), Some(2), 4, 2)]
    #[case(Some(1), None, 1, 1)]
    #[case(Some(2), Some(5), 2, 1)]
    fn test_worker_counts(
        #[case] preparation: Option<usize>,
        #[case] thumbnails: Option<usize>,
        #[case] expected_n: usize,
        #[case] expected_m: usize,
    ) {
        let config = ImportConfig { preparation_workers: preparation, thumbnail_workers: thumbnails, ..Default::default() };
        assert_eq!(config.preparation_workers(), expected_n);
        assert_eq!(config.thumbnail_workers(), expected_m);
    }

    #[test]
    fn test_automatic_worker_count_is_capped() {
        let config = ImportConfig::default();
        let n = config.preparation_workers();
        assert!((1..=MAX_PREPARATION_WORKERS).contains(&n));
        assert!(config.thumbnail_workers() <= n);
    }

    #[test]
    fn test_explicit_paths_win() {
        let mut config = Config::default();
        config.paths.database = Some(PathBuf::from("/tmp/db.sqlite"));
        config.thumbnails.directory = Some(PathBuf::from("/tmp/thumbs"));
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/db.sqlite"));
        assert_eq!(config.thumbnail_dir().unwrap(), PathBuf::from("/tmp/thumbs"));
    }
}
