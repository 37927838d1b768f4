use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use meshvault_config::ExtraFilePolicy;
use meshvault_storage::dotted_extension;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Rename into place (same volume).
    Move,
    /// Copy into place, leaving the source (different volume).
    Copy,
    /// Leave the file where it is.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationItem {
    pub source_path: PathBuf,
    /// For [`Operation::Skip`] this is the source path.
    pub dest_path: PathBuf,
    pub operation: Operation,
    /// Library folder the file belongs in.
    pub category: String,
    /// Neither a model nor a model's thumbnail.
    pub is_extra: bool,
    pub is_thumbnail: bool,
    /// For thumbnails, the source path of the model they belong to.
    pub primary_model_source: Option<PathBuf>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub error: Option<String>,
}
impl ConsolidationItem {
    pub fn is_actionable(&self) -> bool {
        self.operation != Operation::Skip
    }

    pub fn file_name(&self) -> String {
        self.source_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }
}

/// Counts by kind and state, for display before and after execution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub models: usize,
    pub thumbnails: usize,
    pub extras: usize,
    pub moves: usize,
    pub copies: usize,
    pub skips: usize,
    pub completed: usize,
    pub failed: usize,
}

/// A declarative description of how to fold `source_root` into the library at
/// `dest_root`. Items keep their own `completed` flag, so a saved plan doubles
/// as the checkpoint for resuming an interrupted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationPlan {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub items: Vec<ConsolidationItem>,
}
impl ConsolidationPlan {
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for item in &self.items {
            match (item.is_thumbnail, item.is_extra) {
                (true, _) => summary.thumbnails += 1,
                (false, true) => summary.extras += 1,
                (false, false) => summary.models += 1,
            }
            match item.operation {
                Operation::Move => summary.moves += 1,
                Operation::Copy => summary.copies += 1,
                Operation::Skip => summary.skips += 1,
            }
            if item.is_actionable() && item.completed {
                summary.completed += 1;
            }
            if item.error.is_some() {
                summary.failed += 1;
            }
        }
        summary
    }

    /// Whether every actionable item has been carried out.
    pub fn is_complete(&self) -> bool {
        self.items.iter().filter(|i| i.is_actionable()).all(|i| i.completed)
    }

    /// Extensions of extra files that `policy` has no decision for. These
    /// were planned as skips; deciding them and rebuilding the plan picks
    /// them up.
    pub fn undecided_extensions(&self, policy: &ExtraFilePolicy) -> BTreeSet<String> {
        self.items
            .iter()
            .filter(|i| i.is_extra)
            .map(|i| dotted_extension(&i.source_path))
            .filter(|ext| !ext.is_empty() && policy.decision(ext).is_none())
            .collect()
    }

    /// Thumbnail items that belong to the model at `source`.
    pub fn thumbnails_of<'a>(&'a self, source: &'a Path) -> impl Iterator<Item = &'a ConsolidationItem> + 'a {
        self.items.iter().filter(move |i| i.is_thumbnail && i.primary_model_source.as_deref() == Some(source))
    }

    /// Writes the plan as JSON, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).or_raise(|| ErrorKind::Plan(path.to_path_buf()))?;
        serde_json::to_writer_pretty(&mut tmp, self).or_raise(|| ErrorKind::Plan(path.to_path_buf()))?;
        tmp.flush().or_raise(|| ErrorKind::Plan(path.to_path_buf()))?;
        tmp.persist(path).or_raise(|| ErrorKind::Plan(path.to_path_buf()))?;
        tracing::debug!(path = %path.display(), items = self.items.len(), "Consolidation plan saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).or_raise(|| ErrorKind::Plan(path.to_path_buf()))?;
        serde_json::from_slice(&bytes).or_raise(|| ErrorKind::Plan(path.to_path_buf()))
    }
}
