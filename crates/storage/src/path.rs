//! Path validation for generated library locations.
//!
//! Destination names are built from templates and user-supplied file names,
//! so they are validated before being joined onto a library root to make sure
//! nothing lands outside of it.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a relative library path, resolving `.` and `..` segments.
///
/// > **Note:** Null bytes and Windows path prefixes are rejected; a `..` that
/// >           would climb above the starting point is rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use meshvault_storage::validate_path;
/// assert!(validate_path("STL_Files/benchy.stl").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert_eq!(
///     validate_path("STL_Files/./sub/../benchy.stl").unwrap(),
///     Path::new("STL_Files/benchy.stl")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate in syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Joins a relative path onto `root` after validating it cannot escape.
pub fn join_within(root: impl AsRef<Path>, relative: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(root.as_ref().join(validate(relative)?))
}

/// Lowercased extension of `path` including the leading dot (`".stl"`), or an
/// empty string when the file has no extension.
pub fn dotted_extension(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
