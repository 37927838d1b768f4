//! Mutable pipeline state persisted between runs.
//!
//! Each concern lives in its own JSON file inside the state directory and is
//! rewritten atomically (temp file + rename) on every change:
//!
//! | File                   | Shape                                   |
//! |------------------------|-----------------------------------------|
//! | `pending_batches.json` | `[["/a.stl", "/b.obj"], ["/c.stl"]]`    |
//! | `extra_files.json`     | `{".pdf": "move-to-misc"}`              |
//! | `library_roots.json`   | `["/srv/models"]`                       |

use crate::error::{ErrorKind, Result};
use crate::policy::{ExtraFileDecision, ExtraFilePolicy};
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{ErrorKind as IoKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

const PENDING_BATCHES: &str = "pending_batches.json";
const EXTRA_FILES: &str = "extra_files.json";
const LIBRARY_ROOTS: &str = "library_roots.json";

/// Read/write accessors for persisted state, serialized by an internal lock so
/// read-modify-write cycles from different tasks never interleave.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    lock: Mutex<()>,
}
impl StateStore {
    /// Open (creating if needed) the state directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).or_raise(|| ErrorKind::StateIo(dir.clone()))?;
        Ok(Self { dir, lock: Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ---------------------------------------------------------------------
    // Pending batches
    // ---------------------------------------------------------------------

    pub fn pending_batches(&self) -> Result<Vec<Vec<PathBuf>>> {
        let _guard = self.guard();
        self.read(PENDING_BATCHES)
    }

    pub fn set_pending_batches(&self, batches: &[Vec<PathBuf>]) -> Result<()> {
        let _guard = self.guard();
        self.write(PENDING_BATCHES, &batches)
    }

    /// Appends batches after any already pending.
    pub fn push_pending_batches(&self, batches: Vec<Vec<PathBuf>>) -> Result<usize> {
        let _guard = self.guard();
        let mut pending: Vec<Vec<PathBuf>> = self.read(PENDING_BATCHES)?;
        pending.extend(batches.into_iter().filter(|b| !b.is_empty()));
        self.write(PENDING_BATCHES, &pending)?;
        Ok(pending.len())
    }

    /// The oldest pending batch, left in the queue.
    pub fn next_pending_batch(&self) -> Result<Option<Vec<PathBuf>>> {
        let _guard = self.guard();
        let pending: Vec<Vec<PathBuf>> = self.read(PENDING_BATCHES)?;
        Ok(pending.into_iter().next())
    }

    /// Drops the first pending batch equal to `batch`. Returns `false` when
    /// no such batch is queued.
    pub fn remove_pending_batch(&self, batch: &[PathBuf]) -> Result<bool> {
        let _guard = self.guard();
        let mut pending: Vec<Vec<PathBuf>> = self.read(PENDING_BATCHES)?;
        let Some(position) = pending.iter().position(|b| b.as_slice() == batch) else {
            return Ok(false);
        };
        pending.remove(position);
        self.write(PENDING_BATCHES, &pending)?;
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Extra-file policy
    // ---------------------------------------------------------------------

    pub fn extra_file_policy(&self) -> Result<ExtraFilePolicy> {
        let _guard = self.guard();
        self.read(EXTRA_FILES)
    }

    pub fn set_extra_file_decision(&self, extension: &str, decision: ExtraFileDecision) -> Result<()> {
        let _guard = self.guard();
        let mut policy: ExtraFilePolicy = self.read(EXTRA_FILES)?;
        policy.set(extension, decision);
        self.write(EXTRA_FILES, &policy)
    }

    pub fn forget_extra_file_decision(&self, extension: &str) -> Result<bool> {
        let _guard = self.guard();
        let mut policy: ExtraFilePolicy = self.read(EXTRA_FILES)?;
        let existed = policy.forget(extension).is_some();
        if existed {
            self.write(EXTRA_FILES, &policy)?;
        }
        Ok(existed)
    }

    // ---------------------------------------------------------------------
    // Library roots
    // ---------------------------------------------------------------------

    pub fn library_roots(&self) -> Result<Vec<PathBuf>> {
        let _guard = self.guard();
        self.read(LIBRARY_ROOTS)
    }

    /// Records `root` as a library root. Returns `false` if it already was one.
    pub fn register_library_root(&self, root: &Path) -> Result<bool> {
        let _guard = self.guard();
        let mut roots: Vec<PathBuf> = self.read(LIBRARY_ROOTS)?;
        if roots.iter().any(|r| r == root) {
            return Ok(false);
        }
        roots.push(root.to_path_buf());
        self.write(LIBRARY_ROOTS, &roots)?;
        tracing::info!(root = %root.display(), "Registered new library root");
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Plumbing
    // ---------------------------------------------------------------------

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // Writes are atomic: a poisoned lock guards no partial state.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(e).or_raise(|| ErrorKind::StateIo(path)),
        };
        serde_json::from_slice(&bytes).or_raise(|| ErrorKind::CorruptState(path))
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let mut tmp = NamedTempFile::new_in(&self.dir).or_raise(|| ErrorKind::StateIo(path.clone()))?;
        serde_json::to_writer_pretty(&mut tmp, value).or_raise(|| ErrorKind::StateIo(path.clone()))?;
        tmp.flush().or_raise(|| ErrorKind::StateIo(path.clone()))?;
        tmp.persist(&path).or_raise(|| ErrorKind::StateIo(path.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_missing_files_read_as_empty() {
        let (_dir, store) = store();
        assert!(store.pending_batches().unwrap().is_empty());
        assert!(store.extra_file_policy().unwrap().is_empty());
        assert!(store.library_roots().unwrap().is_empty());
    }

    #[test]
    fn test_pending_batches_are_json_array_of_arrays() {
        let (_dir, store) = store();
        let batches = vec![
            vec![PathBuf::from("/models/a.stl"), PathBuf::from("/models/b.obj")],
            vec![PathBuf::from("/models/c.3mf")],
        ];
        store.set_pending_batches(&batches).unwrap();
        let raw = std::fs::read_to_string(store.dir().join(PENDING_BATCHES)).unwrap();
        let parsed: Vec<Vec<String>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec![vec!["/models/a.stl", "/models/b.obj"], vec!["/models/c.3mf"]]);
        assert_eq!(store.pending_batches().unwrap(), batches);
    }

    #[test]
    fn test_pending_batches_queue_order() {
        let (_dir, store) = store();
        assert_eq!(store.push_pending_batches(vec![vec![PathBuf::from("/1.stl")]]).unwrap(), 1);
        assert_eq!(store.push_pending_batches(vec![vec![PathBuf::from("/2.stl")], vec![]]).unwrap(), 2);
        let first = store.next_pending_batch().unwrap().unwrap();
        assert_eq!(first, vec![PathBuf::from("/1.stl")]);
        assert_eq!(store.next_pending_batch().unwrap(), Some(first.clone()));
        assert!(store.remove_pending_batch(&first).unwrap());
        assert!(!store.remove_pending_batch(&first).unwrap());
        assert_eq!(store.next_pending_batch().unwrap(), Some(vec![PathBuf::from("/2.stl")]));
        assert!(store.remove_pending_batch(&[PathBuf::from("/2.stl")]).unwrap());
        assert_eq!(store.next_pending_batch().unwrap(), None);
    }

    #[test]
    fn test_state_survives_reopen() {
        let (dir, store) = store();
        store.set_extra_file_decision("PDF", ExtraFileDecision::MoveToMisc).unwrap();
        store.register_library_root(Path::new("/srv/models")).unwrap();
        drop(store);
        let reopened = StateStore::open(dir.path().join("state")).unwrap();
        assert_eq!(reopened.extra_file_policy().unwrap().decision(".pdf"), Some(ExtraFileDecision::MoveToMisc));
        assert_eq!(reopened.library_roots().unwrap(), vec![PathBuf::from("/srv/models")]);
    }

    #[test]
    fn test_register_root_is_idempotent() {
        let (_dir, store) = store();
        assert!(store.register_library_root(Path::new("/srv/models")).unwrap());
        assert!(!store.register_library_root(Path::new("/srv/models")).unwrap());
        assert_eq!(store.library_roots().unwrap().len(), 1);
    }

    #[test]
    fn test_forget_decision() {
        let (_dir, store) = store();
        store.set_extra_file_decision(".mp4", ExtraFileDecision::LeaveInPlace).unwrap();
        assert!(store.forget_extra_file_decision("mp4").unwrap());
        assert!(!store.forget_extra_file_decision("mp4").unwrap());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let (_dir, store) = store();
        std::fs::write(store.dir().join(PENDING_BATCHES), b"{not json").unwrap();
        let err = store.pending_batches().unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptState(_)));
    }
}
