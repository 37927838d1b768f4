use crate::classify::{FileClass, MISC_FOLDER, category_folder, is_safe, is_thumbnail_of};
use crate::consolidate::models::{ConsolidationItem, ConsolidationPlan, Operation};
use crate::error::{ErrorKind, Result};
use crate::template::with_suffix;
use exn::ResultExt;
use meshvault_config::{ExtraFileDecision, ExtraFilePolicy};
use meshvault_storage::{FileEntry, WalkOptions, dotted_extension, same_volume, walk_all};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Plans how to fold every file below `source_root` into the library at
/// `dest_root`.
///
/// Unsafe files (executables, scripts, OS metadata, hidden files) are left out
/// of the plan entirely. Models and G-code go to their category folder,
/// images named after a model in the same folder travel with it, and
/// everything else follows `policy`; extras without a decision are skipped.
/// Nothing is touched on disk.
#[instrument(skip(policy), fields(source = %source_root.display(), dest = %dest_root.display()))]
pub async fn build_plan(source_root: &Path, dest_root: &Path, policy: &ExtraFilePolicy) -> Result<ConsolidationPlan> {
    let mut exclude = Vec::new();
    if dest_root != source_root && dest_root.starts_with(source_root) {
        exclude.push(dest_root.to_path_buf());
    }
    let options = WalkOptions { exclude, skip_hidden_dirs: true };
    let entries = walk_all(source_root, &options).await.or_raise(|| ErrorKind::Storage)?;

    let mut folders: BTreeMap<PathBuf, Vec<FileEntry>> = BTreeMap::new();
    let mut rejected = 0;
    for entry in entries {
        if !is_safe(&entry.path) {
            tracing::debug!(path = %entry.path.display(), "Excluding file rejected by security filter");
            rejected += 1;
            continue;
        }
        folders.entry(entry.parent().to_path_buf()).or_default().push(entry);
    }

    let mut planner = Planner::new(dest_root);
    let mut items = Vec::new();
    for files in folders.into_values() {
        planner.plan_folder(files, policy, &mut items);
    }
    let plan = ConsolidationPlan { source_root: source_root.to_path_buf(), dest_root: dest_root.to_path_buf(), items };
    let summary = plan.summary();
    tracing::info!(
        models = summary.models,
        thumbnails = summary.thumbnails,
        extras = summary.extras,
        skipped = summary.skips,
        rejected,
        "Consolidation plan built"
    );
    Ok(plan)
}

struct Planner<'a> {
    dest_root: &'a Path,
    /// Destinations already handed out in this plan.
    claimed: HashSet<PathBuf>,
    /// Move-or-copy verdict per source directory.
    volumes: HashMap<PathBuf, Operation>,
}
impl<'a> Planner<'a> {
    fn new(dest_root: &'a Path) -> Self {
        Self { dest_root, claimed: HashSet::new(), volumes: HashMap::new() }
    }

    fn plan_folder(&mut self, files: Vec<FileEntry>, policy: &ExtraFilePolicy, items: &mut Vec<ConsolidationItem>) {
        let (primary, rest): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| FileClass::of(&f.path).is_primary());
        let mut paired: HashSet<PathBuf> = HashSet::new();

        for model in primary {
            let category = category_folder(&model.path);
            let dest_path = self.destination(category, &file_name(&model.path), &model.path);
            let operation = self.operation(&model.path, &dest_path);
            let model_stem = stem(&model.path);
            let dest_stem = stem(&dest_path);
            items.push(item(&model.path, dest_path, operation, category, false, None));

            let thumbnails = rest.iter().filter(|f| {
                FileClass::of(&f.path) == FileClass::Image
                    && !paired.contains(&f.path)
                    && is_thumbnail_of(&stem(&f.path), &model_stem)
            });
            let thumbnails: Vec<PathBuf> = thumbnails.map(|f| f.path.clone()).collect();
            for image in thumbnails {
                let ext = dotted_extension(&image);
                let dest_path = self.destination(category, &format!("{dest_stem}_thumb{ext}"), &image);
                let operation = self.operation(&image, &dest_path);
                items.push(item(&image, dest_path, operation, category, true, Some(model.path.clone())));
                paired.insert(image);
            }
        }

        for extra in rest.into_iter().filter(|f| !paired.contains(&f.path)) {
            let decision = policy.decision(&dotted_extension(&extra.path));
            let (dest_path, operation) = match decision {
                Some(ExtraFileDecision::MoveToMisc) => {
                    let dest_path = self.destination(MISC_FOLDER, &file_name(&extra.path), &extra.path);
                    let operation = self.operation(&extra.path, &dest_path);
                    (dest_path, operation)
                },
                Some(ExtraFileDecision::LeaveInPlace) | None => (extra.path.clone(), Operation::Skip),
            };
            let mut planned = item(&extra.path, dest_path, operation, MISC_FOLDER, false, None);
            planned.is_extra = true;
            items.push(planned);
        }
    }

    /// First free `{dest_root}/{category}/{name}`, suffixing the stem on
    /// collision with another planned item or with a file already on disk.
    /// `source` itself never counts as a collision.
    fn destination(&mut self, category: &str, name: &str, source: &Path) -> PathBuf {
        let target = self.dest_root.join(category).join(name);
        let mut n = 0;
        loop {
            let candidate = with_suffix(&target, n);
            let occupied = candidate != source && candidate.exists();
            if !occupied && self.claimed.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Move within a volume, copy across volumes or when unsure.
    fn operation(&mut self, source: &Path, dest: &Path) -> Operation {
        if source == dest {
            return Operation::Skip;
        }
        let dir = source.parent().unwrap_or(source).to_path_buf();
        let dest_root = self.dest_root;
        *self.volumes.entry(dir).or_insert_with_key(|dir| match same_volume(dir, dest_root) {
            Ok(true) => Operation::Move,
            Ok(false) => Operation::Copy,
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %*e, "Could not compare volumes; copying");
                Operation::Copy
            },
        })
    }
}

fn item(
    source: &Path,
    dest_path: PathBuf,
    operation: Operation,
    category: &str,
    is_thumbnail: bool,
    primary_model_source: Option<PathBuf>,
) -> ConsolidationItem {
    ConsolidationItem {
        source_path: source.to_path_buf(),
        // Already in place.
        completed: operation == Operation::Skip && source == dest_path.as_path(),
        dest_path,
        operation,
        category: category.to_string(),
        is_extra: false,
        is_thumbnail,
        primary_model_source,
        error: None,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn stem(path: &Path) -> String {
    path.file_stem().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}
