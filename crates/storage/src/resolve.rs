//! Lexical path resolution under the storage root.

use std::path::{Component, Path, PathBuf};

use crate::StorageError;

/// Resolves a user-supplied relative path against `root`.
///
/// The walk is purely lexical and happens before any filesystem access:
/// `.` is dropped, `..` pops one level and must never climb above the
/// root, and absolute components (`/`, drive prefixes) are rejected
/// outright. The result is always the root itself or a descendant of it.
pub(crate) fn resolve_under(root: &Path, user_path: &str) -> Result<PathBuf, StorageError> {
    let mut resolved = root.to_path_buf();

    for component in Path::new(user_path).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(root) {
                    return Err(StorageError::InvalidPath(user_path.to_owned()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidPath(user_path.to_owned()));
            }
        }
    }

    if !resolved.starts_with(root) {
        return Err(StorageError::InvalidPath(user_path.to_owned()));
    }
    Ok(resolved)
}
