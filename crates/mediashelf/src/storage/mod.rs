//! Uniform access to local and cloud-backed storage.
//!
//! All paths handed to a [`FileSystem`] are absolute. Implementations map
//! their native failures onto [`StorageError`] so callers can tell a
//! missing file from a busy one.

pub mod filesystem;
pub mod memory;
pub mod registry;

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub use filesystem::LocalFileSystem;
pub use memory::MemoryFileSystem;
pub use registry::FileSystemRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
}

impl Entry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

pub trait FileSystem: Send + Sync {
    /// Looks up a single path.
    fn resolve(&self, path: &Path) -> Result<Entry, StorageError>;

    /// Direct children of a directory.
    fn list(&self, dir: &Path) -> Result<Vec<Entry>, StorageError>;

    /// Every file below `root`, recursively.
    fn walk_files(&self, root: &Path) -> Result<Vec<Entry>, StorageError>;

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Renames within the same directory. Returns the new path.
    fn rename(&self, path: &Path, new_name: &str) -> Result<PathBuf, StorageError>;

    /// Moves a file into `dest_dir`, keeping its name. Returns the new path.
    fn move_to(&self, path: &Path, dest_dir: &Path) -> Result<PathBuf, StorageError>;

    /// Deletes a file or an empty directory.
    fn delete(&self, path: &Path) -> Result<(), StorageError>;

    /// Creates `parent/name`. Succeeds if the directory already exists.
    fn create_directory(&self, parent: &Path, name: &str) -> Result<PathBuf, StorageError>;

    /// Free bytes on the volume holding `path`, when the backend knows.
    fn available_space(&self, path: &Path) -> Result<Option<u64>, StorageError>;
}

/// Creates every component of `relative_dir` below `root`.
pub fn ensure_directory(
    fs: &dyn FileSystem,
    root: &Path,
    relative_dir: &str,
) -> Result<PathBuf, StorageError> {
    let mut current = root.to_path_buf();
    for component in relative_dir.split(['/', '\\']).filter(|c| !c.is_empty()) {
        let next = current.join(component);
        match fs.resolve(&next) {
            Ok(entry) if entry.is_dir() => {}
            Ok(_) => return Err(StorageError::NotADirectory(next)),
            Err(e) if e.is_not_found() => {
                fs.create_directory(&current, component)?;
            }
            Err(e) => return Err(e),
        }
        current = next;
    }
    Ok(current)
}

/// Deletes empty directories below `root`, depth first. `root` itself is
/// never removed. Returns the number of directories deleted.
pub fn remove_empty_directories(fs: &dyn FileSystem, root: &Path) -> Result<usize, StorageError> {
    fn prune(fs: &dyn FileSystem, dir: &Path, is_root: bool, removed: &mut usize) -> Result<bool, StorageError> {
        let mut remaining = 0usize;
        for entry in fs.list(dir)? {
            if entry.is_dir() {
                if !prune(fs, &entry.path, false, removed)? {
                    remaining += 1;
                }
            } else {
                remaining += 1;
            }
        }
        if remaining == 0 && !is_root {
            fs.delete(dir)?;
            *removed += 1;
            return Ok(true);
        }
        Ok(false)
    }

    let mut removed = 0;
    prune(fs, root, true, &mut removed)?;
    Ok(removed)
}

/// Case-insensitive path comparison, used for move-onto-self checks.
pub fn same_path_ignore_case(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}
