use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use meshvault_config::StateStore;
use std::path::Path;

/// Where library roots accepted for organized imports are recorded.
pub trait RootRegistry: Send + Sync {
    fn is_registered(&self, root: &Path) -> Result<bool>;
    /// Records `root`; registering a known root is a no-op.
    fn register(&self, root: &Path) -> Result<()>;
}

impl RootRegistry for StateStore {
    fn is_registered(&self, root: &Path) -> Result<bool> {
        let roots = self.library_roots().or_raise(|| ErrorKind::State)?;
        Ok(roots.iter().any(|r| r == root))
    }

    fn register(&self, root: &Path) -> Result<()> {
        self.register_library_root(root).or_raise(|| ErrorKind::State)?;
        Ok(())
    }
}
