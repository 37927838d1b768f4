use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use meshvault_config::StateStore;
use std::path::PathBuf;

/// Splits `paths` into consecutive batches of at most `cap` paths.
pub fn split_batches(paths: Vec<PathBuf>, cap: usize) -> Vec<Vec<PathBuf>> {
    let cap = cap.max(1);
    let mut batches = Vec::with_capacity(paths.len().div_ceil(cap));
    let mut paths = paths.into_iter().peekable();
    while paths.peek().is_some() {
        batches.push(paths.by_ref().take(cap).collect());
    }
    batches
}

/// Durable queue of batches deferred from oversized imports.
pub trait PendingBatchStore: Send + Sync {
    /// Appends `batches`, returning how many are now pending.
    fn push(&self, batches: Vec<Vec<PathBuf>>) -> Result<usize>;
    /// The oldest batch, still queued. A batch stays queued until
    /// [`remove`](Self::remove) is called for it, so a crash while it runs
    /// loses nothing.
    fn peek(&self) -> Result<Option<Vec<PathBuf>>>;
    /// Drops `batch` from the queue once it has been dealt with.
    fn remove(&self, batch: &[PathBuf]) -> Result<()>;
    fn count(&self) -> Result<usize>;
}

impl PendingBatchStore for StateStore {
    fn push(&self, batches: Vec<Vec<PathBuf>>) -> Result<usize> {
        self.push_pending_batches(batches).or_raise(|| ErrorKind::State)
    }

    fn peek(&self) -> Result<Option<Vec<PathBuf>>> {
        self.next_pending_batch().or_raise(|| ErrorKind::State)
    }

    fn remove(&self, batch: &[PathBuf]) -> Result<()> {
        if !self.remove_pending_batch(batch).or_raise(|| ErrorKind::State)? {
            tracing::warn!(files = batch.len(), "Finished batch was no longer queued");
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.pending_batches().or_raise(|| ErrorKind::State)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/in/{i}.stl"))).collect()
    }

    #[rstest]
    #[case(0, 500, vec![])]
    #[case(3, 500, vec![3])]
    #[case(500, 500, vec![500])]
    #[case(600, 500, vec![500, 100])]
    #[case(1201, 500, vec![500, 500, 201])]
    #[case(2, 0, vec![1, 1])]
    fn test_split_batches(#[case] n: usize, #[case] cap: usize, #[case] sizes: Vec<usize>) {
        let batches = split_batches(paths(n), cap);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), sizes);
    }

    #[test]
    fn test_split_keeps_input_order() {
        let batches = split_batches(paths(5), 2);
        assert_eq!(batches.concat(), paths(5));
    }

    #[test]
    fn test_state_store_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        assert_eq!(PendingBatchStore::count(&store).unwrap(), 0);
        assert_eq!(store.push(vec![paths(2), paths(1)]).unwrap(), 2);
        assert_eq!(store.peek().unwrap(), Some(paths(2)));
        assert_eq!(PendingBatchStore::count(&store).unwrap(), 2);
        store.remove(&paths(2)).unwrap();
        assert_eq!(store.peek().unwrap(), Some(paths(1)));
        assert_eq!(PendingBatchStore::count(&store).unwrap(), 1);
    }
}
