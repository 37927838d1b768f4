//! Content-addressed thumbnail cache.
//!
//! Every model is rendered once, at the largest configured size, and that
//! render is scaled down for the remaining sizes. Files are named purely from
//! the content hash so identical models share thumbnails:
//!
//! ```text
//! {dir}/{hash}.png         largest size (the canvas)
//! {dir}/{hash}_{size}.png  every other size
//! ```

use crate::error::{ErrorKind, Result};
use crate::imaging;
use crate::renderer::{RenderOptions, Renderer};
use exn::ResultExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub const DEFAULT_SIZES: [u32; 3] = [1280, 512, 128];

/// Thumbnails available for one content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub hash: String,
    /// The canvas-sized image.
    pub path: PathBuf,
    /// Every size written, keyed by pixel size.
    pub sizes: BTreeMap<u32, PathBuf>,
    /// `true` when served from the cache without rendering.
    pub cached: bool,
    pub elapsed: Duration,
}

/// One model in a [`ThumbnailService::generate_batch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub model: PathBuf,
    pub hash: String,
}

/// Emitted after every item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    /// Items finished so far, including the current one.
    pub completed: usize,
    pub total: usize,
    pub current: String,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub request: ThumbnailRequest,
    pub result: std::result::Result<Thumbnail, String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub generated: usize,
    pub cached: usize,
    pub failed: usize,
    /// The batch stopped early because cancellation was requested.
    pub cancelled: bool,
    pub outcomes: Vec<BatchOutcome>,
}
impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.generated + self.cached
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
    pub errors: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub generated: u64,
    pub failures: u64,
    /// Cumulative wall time spent rendering and resizing.
    pub generation_time: Duration,
}
impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 { 0.0 } else { self.hits as f64 / lookups as f64 }
    }
}

/// Renders and caches thumbnails keyed by content hash.
///
/// Concurrent requests for the same hash are serialized so a model is never
/// rendered twice at once; different hashes proceed in parallel.
pub struct ThumbnailService {
    dir: PathBuf,
    renderer: Arc<dyn Renderer>,
    /// Descending; the first entry is the render canvas.
    sizes: Vec<u32>,
    known: Mutex<HashMap<String, PathBuf>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    stats: Mutex<CacheStats>,
}
impl ThumbnailService {
    pub fn new(dir: impl Into<PathBuf>, renderer: Arc<dyn Renderer>, sizes: &[u32]) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).or_raise(|| ErrorKind::Cache(dir.clone()))?;
        let mut sizes: Vec<u32> = sizes.iter().copied().filter(|s| *s > 0).collect();
        if sizes.is_empty() {
            sizes = DEFAULT_SIZES.to_vec();
        }
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes.dedup();
        Ok(Self {
            dir,
            renderer,
            sizes,
            known: Mutex::default(),
            locks: Mutex::default(),
            stats: Mutex::default(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn canvas_size(&self) -> u32 {
        self.sizes[0]
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    pub fn stats(&self) -> CacheStats {
        *lock(&self.stats)
    }

    /// Canonical (canvas-sized) cache file for `hash`.
    pub fn canonical_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.png"))
    }

    /// Cache file for `hash` at `size`.
    pub fn sized_path(&self, hash: &str, size: u32) -> PathBuf {
        match size == self.canvas_size() {
            true => self.canonical_path(hash),
            false => self.dir.join(format!("{hash}_{size}.png")),
        }
    }

    fn size_map(&self, hash: &str) -> BTreeMap<u32, PathBuf> {
        self.sizes.iter().map(|s| (*s, self.sized_path(hash, *s))).collect()
    }

    /// Whether a thumbnail exists for `hash`.
    ///
    /// The in-memory map answers first; entries whose file vanished are
    /// evicted and the disk is consulted, repopulating the map on a hit.
    pub fn is_cached(&self, hash: &str) -> bool {
        if validate_hash(hash).is_err() {
            return false;
        }
        let mut known = lock(&self.known);
        if let Some(path) = known.get(hash) {
            if path.is_file() {
                return true;
            }
            tracing::debug!(hash, "Evicting stale thumbnail cache entry");
            known.remove(hash);
        }
        let canonical = self.canonical_path(hash);
        if canonical.is_file() {
            known.insert(hash.to_string(), canonical);
            return true;
        }
        false
    }

    /// The cached thumbnail for `hash`, if any.
    pub fn cached(&self, hash: &str) -> Option<Thumbnail> {
        self.is_cached(hash).then(|| self.thumbnail(hash, true, Duration::ZERO))
    }

    fn thumbnail(&self, hash: &str, cached: bool, elapsed: Duration) -> Thumbnail {
        Thumbnail {
            hash: hash.to_string(),
            path: self.canonical_path(hash),
            sizes: self.size_map(hash),
            cached,
            elapsed,
        }
    }

    /// Returns the cached thumbnail for `hash`, rendering `model` first when
    /// there is none or `force` is set.
    #[instrument(skip(self, options), fields(model = %model.display()))]
    pub async fn generate(&self, model: &Path, hash: &str, options: &RenderOptions, force: bool) -> Result<Thumbnail> {
        validate_hash(hash)?;
        let guard = self.lock_for(hash);
        let result = {
            let _held = guard.lock().await;
            self.generate_locked(model, hash, options, force).await
        };
        self.release(hash, guard);
        result
    }

    async fn generate_locked(&self, model: &Path, hash: &str, options: &RenderOptions, force: bool) -> Result<Thumbnail> {
        if !force && let Some(hit) = self.cached(hash) {
            lock(&self.stats).hits += 1;
            tracing::trace!(hash, "Thumbnail cache hit");
            return Ok(hit);
        }
        lock(&self.stats).misses += 1;

        let started = Instant::now();
        let renderer = Arc::clone(&self.renderer);
        let options = RenderOptions { size: self.canvas_size(), ..options.clone() };
        let model = model.to_path_buf();
        let dir = self.dir.clone();
        let targets = self.size_map(hash);
        let outcome = tokio::task::spawn_blocking(move || {
            let render = tempfile::Builder::new()
                .prefix(".render-")
                .suffix(".png")
                .tempfile_in(&dir)
                .or_raise(|| ErrorKind::Cache(dir.clone()))?;
            renderer.render_to(&model, &options, render.path())?;
            let image = imaging::open(render.path())?;
            write_sizes(&image, &targets)
        })
        .await
        .or_raise(|| ErrorKind::Io)
        .and_then(|r| r);
        let elapsed = started.elapsed();

        let mut stats = lock(&self.stats);
        stats.generation_time += elapsed;
        match outcome {
            Ok(()) => {
                stats.generated += 1;
                drop(stats);
                lock(&self.known).insert(hash.to_string(), self.canonical_path(hash));
                tracing::debug!(hash, elapsed_ms = elapsed.as_millis() as u64, "Thumbnail generated");
                Ok(self.thumbnail(hash, false, elapsed))
            },
            Err(e) => {
                stats.failures += 1;
                tracing::warn!(hash, error = %*e, "Thumbnail generation failed");
                Err(e)
            },
        }
    }

    /// Imports an existing image (a thumbnail shipped alongside the model) as
    /// the thumbnail for `hash`, without rendering.
    #[instrument(skip(self), fields(image = %image.display()))]
    pub async fn register_existing(&self, hash: &str, image: &Path) -> Result<Thumbnail> {
        validate_hash(hash)?;
        let guard = self.lock_for(hash);
        let result = {
            let _held = guard.lock().await;
            match self.cached(hash) {
                Some(hit) => Ok(hit),
                None => {
                    let started = Instant::now();
                    let source = image.to_path_buf();
                    let targets = self.size_map(hash);
                    tokio::task::spawn_blocking(move || write_sizes(&imaging::open(&source)?, &targets))
                        .await
                        .or_raise(|| ErrorKind::Io)
                        .and_then(|r| r)
                        .map(|()| {
                            lock(&self.known).insert(hash.to_string(), self.canonical_path(hash));
                            self.thumbnail(hash, false, started.elapsed())
                        })
                },
            }
        };
        self.release(hash, guard);
        result
    }

    /// Generates thumbnails one after another.
    ///
    /// Cancellation is checked before each item; a failed item is recorded and
    /// the batch continues. Every request gets an outcome, and those never
    /// attempted because of cancellation carry [`ErrorKind::Cancelled`].
    /// `progress` fires after every attempted item.
    pub async fn generate_batch(
        &self,
        items: &[ThumbnailRequest],
        options: &RenderOptions,
        cancel: &CancellationToken,
        mut progress: impl FnMut(BatchProgress),
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let total = items.len();
        for (index, request) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(completed = index, total, "Thumbnail batch cancelled");
                report.cancelled = true;
                let skipped = items[index..].iter().map(|request| BatchOutcome {
                    request: request.clone(),
                    result: Err(ErrorKind::Cancelled.to_string()),
                });
                report.outcomes.extend(skipped);
                break;
            }
            let result = self.generate(&request.model, &request.hash, options, false).await;
            match &result {
                Ok(t) if t.cached => report.cached += 1,
                Ok(_) => report.generated += 1,
                Err(_) => report.failed += 1,
            }
            report.outcomes.push(BatchOutcome { request: request.clone(), result: result.map_err(|e| (*e).to_string()) });
            progress(BatchProgress {
                completed: index + 1,
                total,
                current: request.model.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            });
        }
        report
    }

    /// Deletes cache files whose hash is not in `valid`.
    #[instrument(skip_all, fields(valid = valid.len()))]
    pub async fn cleanup_orphaned(&self, valid: &HashSet<String>) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Could not read thumbnail directory");
                report.errors += 1;
                return report;
            },
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read thumbnail directory entry");
                    report.errors += 1;
                    break;
                },
            };
            let name = entry.file_name();
            let Some(hash) = name.to_str().and_then(hash_of) else {
                continue;
            };
            if valid.contains(hash) {
                report.kept += 1;
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    lock(&self.known).remove(hash);
                    report.removed += 1;
                },
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Could not remove orphaned thumbnail");
                    report.errors += 1;
                },
            }
        }
        tracing::info!(removed = report.removed, kept = report.kept, errors = report.errors, "Thumbnail cleanup finished");
        report
    }

    fn lock_for(&self, hash: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(lock(&self.locks).entry(hash.to_string()).or_default())
    }

    /// Drops the per-hash lock once nobody else holds or awaits it.
    fn release(&self, hash: &str, guard: Arc<AsyncMutex<()>>) {
        let mut locks = lock(&self.locks);
        // One reference in the map, one here.
        if Arc::strong_count(&guard) <= 2 {
            locks.remove(hash);
        }
    }
}

/// Writes the canvas image and every smaller size. Only a failure to write the
/// canvas is fatal; smaller sizes are logged and skipped.
fn write_sizes(image: &image::DynamicImage, targets: &BTreeMap<u32, PathBuf>) -> Result<()> {
    let mut sizes = targets.iter().rev();
    let Some((canvas, canonical)) = sizes.next() else {
        return Ok(());
    };
    imaging::write_png(&imaging::fit(image, *canvas), canonical)?;
    for (size, path) in sizes {
        if let Err(e) = imaging::write_png(&imaging::fit(image, *size), path) {
            tracing::warn!(path = %path.display(), error = %*e, "Could not write resized thumbnail");
        }
    }
    Ok(())
}

fn validate_hash(hash: &str) -> Result<()> {
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
        exn::bail!(ErrorKind::InvalidHash(hash.to_string()));
    }
    Ok(())
}

/// Hash encoded in a cache file name, or `None` for foreign files.
fn hash_of(file_name: &str) -> Option<&str> {
    let stem = file_name.strip_suffix(".png")?;
    let hash = match stem.split_once('_') {
        Some((hash, size)) if size.parse::<u32>().is_ok() => hash,
        Some(_) => return None,
        None => stem,
    };
    validate_hash(hash).ok().map(|()| hash)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Paints a solid square and counts invocations.
    #[derive(Default)]
    struct FakeRenderer {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }
    impl Renderer for FakeRenderer {
        fn render_to(&self, model: &Path, options: &RenderOptions, save_to: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.is_some_and(|n| model.ends_with(n)) {
                exn::bail!(ErrorKind::RendererFailed(1));
            }
            imaging::solid_png(save_to, options.size, options.size);
            Ok(())
        }
    }

    fn service(renderer: Arc<FakeRenderer>) -> (tempfile::TempDir, ThumbnailService) {
        let dir = tempfile::tempdir().unwrap();
        // Small sizes keep the tests fast; the naming scheme is size-agnostic.
        let service = ThumbnailService::new(dir.path().join("thumbs"), renderer, &[16, 64, 32]).unwrap();
        (dir, service)
    }

    #[tokio::test]
    async fn test_second_generate_is_cached() {
        let renderer = Arc::new(FakeRenderer::default());
        let (_dir, service) = service(Arc::clone(&renderer));
        let options = RenderOptions::default();

        let first = service.generate(Path::new("/m/cube.stl"), "abc123", &options, false).await.unwrap();
        assert!(!first.cached);
        let second = service.generate(Path::new("/m/cube.stl"), "abc123", &options, false).await.unwrap();
        assert!(second.cached);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);

        let stats = service.stats();
        assert_eq!((stats.hits, stats.misses, stats.generated), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_force_regenerates() {
        let renderer = Arc::new(FakeRenderer::default());
        let (_dir, service) = service(Arc::clone(&renderer));
        let options = RenderOptions::default();
        service.generate(Path::new("/m/a.stl"), "aa", &options, false).await.unwrap();
        let forced = service.generate(Path::new("/m/a.stl"), "aa", &options, true).await.unwrap();
        assert!(!forced.cached);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_sizes_are_derived_from_one_render() {
        let renderer = Arc::new(FakeRenderer::default());
        let (_dir, service) = service(Arc::clone(&renderer));
        let thumbnail = service.generate(Path::new("/m/a.stl"), "ff00", &RenderOptions::default(), false).await.unwrap();
        assert_eq!(service.canvas_size(), 64);
        assert_eq!(thumbnail.path, service.directory().join("ff00.png"));
        assert_eq!(thumbnail.sizes.len(), 3);
        for (size, path) in &thumbnail.sizes {
            assert_eq!(image::image_dimensions(path).unwrap(), (*size, *size));
        }
        assert!(thumbnail.sizes[&16].ends_with("ff00_16.png"));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_render_once() {
        let renderer = Arc::new(FakeRenderer::default());
        let (_dir, service) = service(Arc::clone(&renderer));
        let service = Arc::new(service);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service.generate(Path::new("/m/a.stl"), "beef", &RenderOptions::default(), false).await.unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert!(lock(&service.locks).is_empty());
    }

    #[tokio::test]
    async fn test_stale_memory_entry_is_evicted() {
        let (_dir, service) = service(Arc::new(FakeRenderer::default()));
        service.generate(Path::new("/m/a.stl"), "cafe", &RenderOptions::default(), false).await.unwrap();
        assert!(service.is_cached("cafe"));
        std::fs::remove_file(service.canonical_path("cafe")).unwrap();
        assert!(!service.is_cached("cafe"));
        assert!(!lock(&service.known).contains_key("cafe"));
    }

    #[tokio::test]
    async fn test_disk_hit_repopulates_memory() {
        let (_dir, service) = service(Arc::new(FakeRenderer::default()));
        imaging::solid_png(&service.canonical_path("d00d"), 64, 64);
        assert!(service.is_cached("d00d"));
        assert!(lock(&service.known).contains_key("d00d"));
    }

    #[tokio::test]
    async fn test_batch_continues_after_failure() {
        let renderer = Arc::new(FakeRenderer { fail_on: Some("broken.stl"), ..Default::default() });
        let (_dir, service) = service(Arc::clone(&renderer));
        let items = vec![
            ThumbnailRequest { model: PathBuf::from("/m/a.stl"), hash: "a1".into() },
            ThumbnailRequest { model: PathBuf::from("/m/broken.stl"), hash: "b2".into() },
            ThumbnailRequest { model: PathBuf::from("/m/c.stl"), hash: "a1".into() },
        ];
        let mut progress = Vec::new();
        let report = service
            .generate_batch(&items, &RenderOptions::default(), &CancellationToken::new(), |p| progress.push(p))
            .await;
        assert_eq!((report.generated, report.cached, report.failed), (1, 1, 1));
        assert!(!report.cancelled);
        assert!(report.outcomes[1].result.is_err());
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[2], BatchProgress { completed: 3, total: 3, current: "c.stl".into() });
        assert_eq!(service.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_batch_observes_cancellation() {
        let (_dir, service) = service(Arc::new(FakeRenderer::default()));
        let items = vec![
            ThumbnailRequest { model: PathBuf::from("/m/a.stl"), hash: "a1".into() },
            ThumbnailRequest { model: PathBuf::from("/m/b.stl"), hash: "b2".into() },
        ];
        let cancel = CancellationToken::new();
        let report = service
            .generate_batch(&items, &RenderOptions::default(), &cancel, |p| {
                if p.completed == 1 {
                    cancel.cancel();
                }
            })
            .await;
        assert!(report.cancelled);
        assert_eq!((report.generated, report.failed), (1, 0));
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes[0].result.is_ok());
        assert_eq!(report.outcomes[1].request.hash, "b2");
        assert_eq!(report.outcomes[1].result.as_ref().unwrap_err(), &ErrorKind::Cancelled.to_string());
    }

    #[tokio::test]
    async fn test_register_existing_image() {
        let renderer = Arc::new(FakeRenderer::default());
        let (dir, service) = service(Arc::clone(&renderer));
        let shipped = dir.path().join("model_thumb.png");
        imaging::solid_png(&shipped, 200, 100);
        let thumbnail = service.register_existing("ab", &shipped).await.unwrap();
        assert_eq!(image::image_dimensions(&thumbnail.path).unwrap(), (64, 32));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
        assert!(service.is_cached("ab"));
    }

    #[tokio::test]
    async fn test_cleanup_orphaned() {
        let (_dir, service) = service(Arc::new(FakeRenderer::default()));
        let options = RenderOptions::default();
        service.generate(Path::new("/m/a.stl"), "keep", &options, false).await.unwrap();
        service.generate(Path::new("/m/b.stl"), "gone", &options, false).await.unwrap();
        std::fs::write(service.directory().join("notes.txt"), b"not ours").unwrap();

        let valid: HashSet<String> = ["keep".to_string()].into();
        let report = service.cleanup_orphaned(&valid).await;
        assert_eq!(report, CleanupReport { removed: 3, kept: 3, errors: 0 });
        assert!(!service.is_cached("gone"));
        assert!(service.is_cached("keep"));
        assert!(service.directory().join("notes.txt").exists());
    }

    #[rstest]
    #[case("abc.png", Some("abc"))]
    #[case("abc_128.png", Some("abc"))]
    #[case("abc_big.png", None)]
    #[case(".render-x1.png", None)]
    #[case("abc.jpg", None)]
    fn test_hash_of(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(hash_of(name), expected);
    }

    #[tokio::test]
    async fn test_rejects_path_like_hashes() {
        let (_dir, service) = service(Arc::new(FakeRenderer::default()));
        let err = service.generate(Path::new("/m/a.stl"), "../evil", &RenderOptions::default(), false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidHash(_)));
    }
}
