//! Sandboxed file operations under a storage root.
//!
//! Every operation takes a user-supplied relative path, resolves it
//! lexically against the canonicalized root (rejecting anything that
//! escapes), and maps OS errors to the protocol's stable taxonomy. The
//! adapter is stateless; file handles live only for the duration of one
//! call.

mod resolve;

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A directory entry returned by [`Storage::list`].
///
/// `size` is populated for regular files only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

/// Typed storage failures, mirroring the wire error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("chemin invalide: {0}")]
    InvalidPath(String),

    #[error("fichier introuvable: {0}")]
    NotFound(String),

    #[error("accès refusé: {0}")]
    PermissionDenied(String),

    #[error("pas un fichier régulier: {0}")]
    NotAFile(String),

    #[error("erreur E/S: {0}")]
    Io(#[from] std::io::Error),
}

/// Sandboxed filesystem access rooted at one directory.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Opens (and creates if needed) the storage root.
    ///
    /// The root is canonicalized once here; all later resolution is
    /// lexical against this absolute path.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = std::fs::canonicalize(root)?;
        Ok(Self { root })
    }

    /// The canonicalized root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates parent directories and truncate-writes `data` to `path`.
    pub fn write_whole(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let full = resolve::resolve_under(&self.root, path)?;
        self.create_parents(&full, path)?;
        std::fs::write(&full, data).map_err(|e| map_io(e, path))
    }

    /// Writes `data` at the absolute byte `offset`, creating the file and
    /// its parents if needed. Existing content outside the written range
    /// is preserved.
    pub fn write_chunk(&self, path: &str, data: &[u8], offset: u64) -> Result<(), StorageError> {
        let full = resolve::resolve_under(&self.root, path)?;
        self.create_parents(&full, path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&full)
            .map_err(|e| map_io(e, path))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| map_io(e, path))?;
        file.write_all(data).map_err(|e| map_io(e, path))?;
        Ok(())
    }

    /// Reads at most `length` bytes starting at `offset`; fewer at EOF.
    pub fn read_chunk(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, StorageError> {
        let full = resolve::resolve_under(&self.root, path)?;
        let mut file = std::fs::File::open(&full).map_err(|e| map_io(e, path))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| map_io(e, path))?;

        let mut buf = Vec::new();
        file.take(length as u64)
            .read_to_end(&mut buf)
            .map_err(|e| map_io(e, path))?;
        Ok(buf)
    }

    /// Size of a regular file in bytes.
    pub fn file_size(&self, path: &str) -> Result<u64, StorageError> {
        let full = resolve::resolve_under(&self.root, path)?;
        let meta = std::fs::metadata(&full).map_err(|e| map_io(e, path))?;
        if !meta.is_file() {
            return Err(StorageError::NotAFile(path.to_owned()));
        }
        Ok(meta.len())
    }

    /// Lists directory entries in the order the filesystem returns them.
    pub fn list(&self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        let full = resolve::resolve_under(&self.root, path)?;
        let entries = std::fs::read_dir(&full).map_err(|e| map_io(e, path))?;

        let items = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                let name = entry.file_name().to_string_lossy().into_owned();
                Some(DirEntry {
                    name,
                    is_dir: meta.is_dir(),
                    size: meta.is_file().then(|| meta.len()),
                })
            })
            .collect();
        Ok(items)
    }

    /// Deletes a regular file. Directories are refused with `NotAFile`.
    pub fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let full = resolve::resolve_under(&self.root, path)?;
        let meta = std::fs::metadata(&full).map_err(|e| map_io(e, path))?;
        if meta.is_dir() {
            return Err(StorageError::NotAFile(path.to_owned()));
        }
        std::fs::remove_file(&full).map_err(|e| map_io(e, path))?;
        tracing::debug!(path, "file deleted");
        Ok(())
    }

    fn create_parents(&self, full: &Path, path: &str) -> Result<(), StorageError> {
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_io(e, path))?;
        }
        Ok(())
    }
}

/// Maps an OS error to the typed taxonomy, keeping the offending path.
fn map_io(err: std::io::Error, path: &str) -> StorageError {
    match err.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_owned()),
        std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_owned()),
        _ => StorageError::Io(err),
    }
}
