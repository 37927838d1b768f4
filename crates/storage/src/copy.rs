//! Chunked copies with progress reporting, and moves that survive crossing
//! filesystem boundaries.

use crate::error::{ErrorKind, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoKind, Read, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Default copy buffer: 1 MiB.
pub const DEFAULT_COPY_CHUNK: usize = 1024 * 1024;

/// Copies `from` into a *new* file at `to`, invoking `progress(percent)` after
/// every chunk with a value in `0.0..=100.0`.
///
/// The destination must not exist. A failed or cancelled copy removes the
/// partially written destination before returning the error, so a caller never
/// has to track half-copied files. Returns the number of bytes written.
#[instrument(level = "debug", skip(progress, cancel), fields(from = %from.display(), to = %to.display()))]
pub fn copy_with_progress(
    from: &Path,
    to: &Path,
    chunk_size: usize,
    mut progress: impl FnMut(f32),
    cancel: Option<&CancellationToken>,
) -> Result<u64> {
    let mut source = File::open(from).map_err(|e| ErrorKind::from_io(e, from))?;
    let total = source.metadata().map_err(|e| ErrorKind::from_io(e, from))?.len();
    let mut target = OpenOptions::new().write(true).create_new(true).open(to).map_err(|e| ErrorKind::from_io(e, to))?;

    match copy_chunks(&mut source, &mut target, total, chunk_size.max(1), &mut progress, cancel, from, to) {
        Ok(written) => Ok(written),
        Err(e) => {
            drop(target);
            if let Err(cleanup) = fs::remove_file(to) {
                tracing::warn!(path = %to.display(), error = %cleanup, "Could not remove partially copied file");
            }
            Err(e)
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn copy_chunks(
    source: &mut File,
    target: &mut File,
    total: u64,
    chunk_size: usize,
    progress: &mut impl FnMut(f32),
    cancel: Option<&CancellationToken>,
    from: &Path,
    to: &Path,
) -> Result<u64> {
    let mut buffer = vec![0; chunk_size];
    let mut written: u64 = 0;
    progress(0.0);
    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            exn::bail!(ErrorKind::Cancelled);
        }
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == IoKind::Interrupted => continue,
            Err(e) => exn::bail!(ErrorKind::from_io(e, from)),
        };
        target.write_all(&buffer[..read]).map_err(|e| ErrorKind::from_io(e, to))?;
        written += read as u64;
        progress(percent(written, total));
    }
    target.sync_all().map_err(|e| ErrorKind::from_io(e, to))?;
    progress(100.0);
    Ok(written)
}

fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as f32
}

/// Moves `from` to `to`, falling back to copy-then-delete when the rename
/// crosses a filesystem boundary. The destination must not exist.
#[instrument(level = "debug", skip(cancel), fields(from = %from.display(), to = %to.display()))]
pub fn move_file(from: &Path, to: &Path, cancel: Option<&CancellationToken>) -> Result<()> {
    if to.exists() {
        exn::bail!(ErrorKind::AlreadyExists(to.to_path_buf()));
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoKind::CrossesDevices => {
            tracing::debug!("Rename crossed a device boundary; copying instead");
            copy_with_progress(from, to, DEFAULT_COPY_CHUNK, |_| {}, cancel)?;
            fs::remove_file(from).map_err(|e| ErrorKind::from_io(e, from))?;
            Ok(())
        },
        Err(e) => exn::bail!(ErrorKind::from_io(e, from)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_reports_progress_and_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("in.stl");
        let to = dir.path().join("out.stl");
        let data = vec![42u8; 10_000];
        fs::write(&from, &data).unwrap();

        let mut seen = Vec::new();
        let written = copy_with_progress(&from, &to, 1024, |p| seen.push(p), None).unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(fs::read(&to).unwrap(), data);
        assert_eq!(seen.first().copied(), Some(0.0));
        assert_eq!(seen.last().copied(), Some(100.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_copy_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("empty.obj");
        let to = dir.path().join("copy.obj");
        fs::write(&from, b"").unwrap();
        assert_eq!(copy_with_progress(&from, &to, 16, |_| {}, None).unwrap(), 0);
        assert!(to.exists());
    }

    #[test]
    fn test_copy_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.stl");
        let to = dir.path().join("b.stl");
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();
        let err = copy_with_progress(&from, &to, 16, |_| {}, None).unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(fs::read(&to).unwrap(), b"old");
    }

    #[test]
    fn test_cancelled_copy_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.stl");
        let to = dir.path().join("b.stl");
        fs::write(&from, vec![1u8; 4096]).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = copy_with_progress(&from, &to, 16, |_| {}, Some(&token)).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!to.exists());
    }

    #[test]
    fn test_move_file() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("model.3mf");
        let to = dir.path().join("moved.3mf");
        fs::write(&from, b"3mf").unwrap();
        move_file(&from, &to, None).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"3mf");
    }

    #[test]
    fn test_move_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.stl");
        let to = dir.path().join("b.stl");
        fs::write(&from, b"a").unwrap();
        fs::write(&to, b"b").unwrap();
        assert!(move_file(&from, &to, None).is_err());
        assert!(from.exists());
    }
}
