//! Recursive, streaming directory walks.

use crate::error::{ErrorKind, Result};
use crate::models::FileEntry;
use async_stream::stream;
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::{self, DirEntry};

pub type FileEntryStream<'a> = Pin<Box<dyn Stream<Item = Result<FileEntry>> + Send + 'a>>;

enum WalkEntry {
    File(FileEntry),
    Descend(PathBuf),
    Skip,
}

/// Options controlling which directories a [`walk`] descends into.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Directories (absolute) that are never entered.
    pub exclude: Vec<PathBuf>,
    /// Skip directories whose name starts with a dot.
    pub skip_hidden_dirs: bool,
}

/// Streams every regular file below `root`, depth-first.
///
/// Unreadable directories and entries are yielded as errors without ending
/// the stream; broken symlinks and special files are silently dropped.
/// Symlinked directories are followed, but every directory is entered at
/// most once, so link cycles terminate.
pub fn walk<'a>(root: &'a Path, options: &'a WalkOptions) -> FileEntryStream<'a> {
    let mut stack = vec![root.to_path_buf()];
    let mut visited: HashSet<PathBuf> = HashSet::new();
    Box::pin(stream! {
        'dirs: while let Some(current) = stack.pop() {
            match fs::canonicalize(&current).await {
                Ok(real) if !visited.insert(real.clone()) => {
                    tracing::debug!(dir = %current.display(), "Directory already walked; skipping link");
                    continue 'dirs;
                },
                Ok(_) => {},
                Err(err) => {
                    yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                    continue 'dirs;
                },
            }
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) => {
                    yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                    continue 'dirs;
                }
            };

            'entries: loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break 'entries,
                    Err(e) => { yield Err(exn::Exn::from(ErrorKind::from_io(e, &current))); continue 'entries; },
                };
                match process_entry(root, entry, options).await {
                    Ok(WalkEntry::File(f)) => yield Ok(f),
                    Ok(WalkEntry::Descend(d)) => stack.push(d),
                    Ok(WalkEntry::Skip) => {},
                    Err(e) => yield Err(e),
                };
            }
        }
    })
}

/// Collects a [`walk`] into a vector sorted by path, logging and dropping
/// per-entry errors.
pub async fn walk_all(root: &Path, options: &WalkOptions) -> Result<Vec<FileEntry>> {
    if !fs::metadata(root).await.map_err(|e| ErrorKind::from_io(e, root))?.is_dir() {
        exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
    }
    let mut files = Vec::new();
    let mut stream = walk(root, options);
    while let Some(entry) = stream.next().await {
        match entry {
            Ok(file) => files.push(file),
            Err(e) => tracing::warn!(root = %root.display(), error = %*e, "Skipping unreadable entry during walk"),
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

async fn process_entry(root: &Path, entry: DirEntry, options: &WalkOptions) -> Result<WalkEntry> {
    let path = entry.path();
    // Follow symlinks so linked models are picked up like regular ones.
    let metadata = match fs::metadata(&path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WalkEntry::Skip),
        Err(e) => exn::bail!(ErrorKind::from_io(e, &path)),
    };
    if metadata.is_dir() {
        let hidden = entry.file_name().to_str().is_some_and(|n| n.starts_with('.'));
        if (options.skip_hidden_dirs && hidden) || options.exclude.iter().any(|x| x == &path) {
            return Ok(WalkEntry::Skip);
        }
        return Ok(WalkEntry::Descend(path));
    }
    if metadata.is_file() {
        return Ok(WalkEntry::File(to_entry(root, path, &metadata)?));
    }
    Ok(WalkEntry::Skip)
}

fn to_entry(root: &Path, path: PathBuf, metadata: &Metadata) -> Result<FileEntry> {
    let modified = metadata.modified().map_err(|e| ErrorKind::from_io(e, &path))?.into();
    let relative = path.strip_prefix(root).map(Path::to_path_buf).unwrap_or_else(|_| path.clone());
    Ok(FileEntry::new(path, relative, metadata.len(), modified))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, relative: &str, data: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    #[tokio::test]
    async fn test_walk_finds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.stl", b"a");
        touch(dir.path(), "sub/b.obj", b"bb");
        touch(dir.path(), "sub/deeper/c.3mf", b"ccc");
        let files = walk_all(dir.path(), &WalkOptions::default()).await.unwrap();
        let relative: Vec<_> = files.iter().map(|f| f.relative.clone()).collect();
        assert_eq!(
            relative,
            vec![PathBuf::from("a.stl"), PathBuf::from("sub/b.obj"), PathBuf::from("sub/deeper/c.3mf")]
        );
        assert_eq!(files[2].size, 3);
    }

    #[tokio::test]
    async fn test_walk_respects_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "keep/a.stl", b"a");
        touch(dir.path(), "library/b.stl", b"b");
        touch(dir.path(), ".git/objects/blob", b"c");
        let options = WalkOptions { exclude: vec![dir.path().join("library")], skip_hidden_dirs: true };
        let files = walk_all(dir.path(), &options).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, PathBuf::from("keep/a.stl"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_survives_symlink_cycles() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "sub/a.stl", b"a");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();
        std::os::unix::fs::symlink(".", dir.path().join("self")).unwrap();
        let files = walk_all(dir.path(), &WalkOptions::default()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, PathBuf::from("sub/a.stl"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_follows_linked_directories_once() {
        let outside = tempfile::tempdir().unwrap();
        touch(outside.path(), "linked.obj", b"o");
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.stl", b"a");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("models")).unwrap();
        let files = walk_all(dir.path(), &WalkOptions::default()).await.unwrap();
        let relative: Vec<_> = files.iter().map(|f| f.relative.clone()).collect();
        assert_eq!(relative, vec![PathBuf::from("a.stl"), PathBuf::from("models/linked.obj")]);
    }

    #[tokio::test]
    async fn test_walk_all_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.stl", b"a");
        assert!(walk_all(&dir.path().join("a.stl"), &WalkOptions::default()).await.is_err());
        assert!(walk_all(&dir.path().join("missing"), &WalkOptions::default()).await.is_err());
    }
}
