//! Volume identity.
//!
//! Deciding between a move and a copy hinges on whether two paths live on the
//! same filesystem. Comparing string prefixes is wrong in both directions
//! (bind mounts, symlinked directories, `/mnt/a` vs `/mnt/ab`), so identity
//! comes from the filesystem itself: the device id on Unix, the drive prefix
//! on Windows.

use crate::error::{ErrorKind, Result};
use std::path::{Path, PathBuf};

/// Returns `true` when `a` and `b` reside on the same volume.
///
/// Either path may not exist yet (a destination folder that is about to be
/// created); its nearest existing ancestor is compared instead.
pub fn same_volume(a: impl AsRef<Path>, b: impl AsRef<Path>) -> Result<bool> {
    let a = existing_ancestor(a.as_ref())?;
    let b = existing_ancestor(b.as_ref())?;
    platform::same_volume(&a, &b)
}

fn existing_ancestor(path: &Path) -> Result<PathBuf> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())))
}

#[cfg(unix)]
mod platform {
    use crate::error::{ErrorKind, Result};
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    pub(super) fn same_volume(a: &Path, b: &Path) -> Result<bool> {
        let a_meta = std::fs::metadata(a).map_err(|e| ErrorKind::from_io(e, a))?;
        let b_meta = std::fs::metadata(b).map_err(|e| ErrorKind::from_io(e, b))?;
        Ok(a_meta.dev() == b_meta.dev())
    }
}

#[cfg(windows)]
mod platform {
    use crate::error::Result;
    use std::path::{Component, Path, Prefix};

    fn drive(path: &Path) -> Option<String> {
        let canonical = std::fs::canonicalize(path).ok()?;
        match canonical.components().next()? {
            Component::Prefix(prefix) => match prefix.kind() {
                Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => Some((letter as char).to_ascii_uppercase().to_string()),
                Prefix::UNC(server, share) | Prefix::VerbatimUNC(server, share) => Some(format!(
                    "\\\\{}\\{}",
                    server.to_string_lossy().to_lowercase(),
                    share.to_string_lossy().to_lowercase()
                )),
                _ => None,
            },
            _ => None,
        }
    }

    pub(super) fn same_volume(a: &Path, b: &Path) -> Result<bool> {
        Ok(matches!((drive(a), drive(b)), (Some(x), Some(y)) if x == y))
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use crate::error::Result;
    use std::path::Path;

    // Unknown platforms copy.
    pub(super) fn same_volume(_a: &Path, _b: &Path) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_directory_is_same_volume() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.stl"), b"a").unwrap();
        assert!(same_volume(dir.path().join("a.stl"), dir.path()).unwrap());
    }

    #[test]
    fn test_missing_destination_uses_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let future = dir.path().join("library/STL_Files/new.stl");
        assert!(same_volume(dir.path(), &future).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_procfs_is_a_different_volume() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!same_volume(dir.path(), "/proc/self").unwrap());
    }
}
