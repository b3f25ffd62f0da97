use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sysinfo::Disks;
use walkdir::WalkDir;

use super::{Entry, EntryKind, FileSystem};
use crate::error::StorageError;

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which handles
/// cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    let rename_err = match fs::rename(src, dst) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    // A missing or locked source will not get better by copying.
    let classified = StorageError::from_io(src, rename_err);
    if classified.is_not_found() || classified.is_busy() {
        return Err(classified);
    }

    fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    if let Err(e) = fs::remove_file(src) {
        // Leave exactly one copy behind.
        let _ = fs::remove_file(dst);
        return Err(StorageError::from_io(src, e));
    }
    Ok(())
}

fn entry_for(path: &Path, meta: &fs::Metadata) -> Entry {
    Entry {
        path: path.to_path_buf(),
        kind: if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        size: if meta.is_dir() { 0 } else { meta.len() },
    }
}

/// [`FileSystem`] over the local disk.
#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }

    fn target_free(&self, target: &Path) -> Result<(), StorageError> {
        if fs::symlink_metadata(target).is_ok() {
            return Err(StorageError::AlreadyExists(target.to_path_buf()));
        }
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn resolve(&self, path: &Path) -> Result<Entry, StorageError> {
        let meta = fs::metadata(path).map_err(|e| StorageError::from_io(path, e))?;
        Ok(entry_for(path, &meta))
    }

    fn list(&self, dir: &Path) -> Result<Vec<Entry>, StorageError> {
        let mut entries = Vec::new();
        for item in fs::read_dir(dir).map_err(|e| StorageError::from_io(dir, e))? {
            let item = item.map_err(|e| StorageError::from_io(dir, e))?;
            let path = item.path();
            match item.metadata() {
                Ok(meta) => entries.push(entry_for(&path, &meta)),
                Err(e) => log::debug!("Skipping unreadable entry {}: {}", path.display(), e),
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn walk_files(&self, root: &Path) -> Result<Vec<Entry>, StorageError> {
        let root_meta = fs::metadata(root).map_err(|e| StorageError::from_io(root, e))?;
        if !root_meta.is_dir() {
            return Err(StorageError::NotADirectory(root.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable path under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => files.push(entry_for(entry.path(), &meta)),
                Err(e) => log::warn!("Cannot stat {}: {}", entry.path().display(), e),
            }
        }
        Ok(files)
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, StorageError> {
        let file = fs::File::open(path).map_err(|e| StorageError::from_io(path, e))?;
        Ok(Box::new(file))
    }

    fn rename(&self, path: &Path, new_name: &str) -> Result<PathBuf, StorageError> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;
        let target = parent.join(new_name);
        self.target_free(&target)?;
        fs::rename(path, &target).map_err(|e| StorageError::from_io(path, e))?;
        Ok(target)
    }

    fn move_to(&self, path: &Path, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        let name = path
            .file_name()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;
        if !fs::metadata(dest_dir)
            .map_err(|e| StorageError::from_io(dest_dir, e))?
            .is_dir()
        {
            return Err(StorageError::NotADirectory(dest_dir.to_path_buf()));
        }
        let target = dest_dir.join(name);
        self.target_free(&target)?;
        move_file(path, &target)?;
        Ok(target)
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let meta = fs::symlink_metadata(path).map_err(|e| StorageError::from_io(path, e))?;
        let result = if meta.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| StorageError::from_io(path, e))
    }

    fn create_directory(&self, parent: &Path, name: &str) -> Result<PathBuf, StorageError> {
        let path = parent.join(name);
        match fs::create_dir(&path) {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(path),
            Err(e) => Err(StorageError::CreateDirectory { path, source: e }),
        }
    }

    fn available_space(&self, path: &Path) -> Result<Option<u64>, StorageError> {
        let disks = Disks::new_with_refreshed_list();
        let best = disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len());
        Ok(best.map(|d| d.available_space()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_file_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("ep1.mkv");
        fs::write(&file, b"video").unwrap();

        let local = LocalFileSystem::new();
        let entry = local.resolve(&file).unwrap();
        assert!(entry.is_file());
        assert_eq!(entry.size, 5);
        assert!(local.resolve(temp_dir.path()).unwrap().is_dir());
        assert!(local
            .resolve(&temp_dir.path().join("missing"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_walk_files_is_recursive() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        fs::write(temp_dir.path().join("top.mkv"), b"1").unwrap();
        fs::write(temp_dir.path().join("a/b/deep.mkv"), b"2").unwrap();

        let mut files: Vec<_> = LocalFileSystem::new()
            .walk_files(temp_dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        files.sort();
        assert_eq!(
            files,
            vec![
                temp_dir.path().join("a/b/deep.mkv"),
                temp_dir.path().join("top.mkv")
            ]
        );
    }

    #[test]
    fn test_rename_refuses_existing_target() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.mkv");
        let b = temp_dir.path().join("b.mkv");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let local = LocalFileSystem::new();
        assert!(matches!(
            local.rename(&a, "b.mkv"),
            Err(StorageError::AlreadyExists(_))
        ));
        let renamed = local.rename(&a, "c.mkv").unwrap();
        assert!(renamed.exists());
        assert!(!a.exists());
    }

    #[test]
    fn test_move_to_directory() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("ep1.mkv");
        let dest = temp_dir.path().join("Show");
        fs::write(&src, b"video").unwrap();
        fs::create_dir(&dest).unwrap();

        let moved = LocalFileSystem::new().move_to(&src, &dest).unwrap();
        assert_eq!(moved, dest.join("ep1.mkv"));
        assert!(!src.exists());
        assert_eq!(fs::read(moved).unwrap(), b"video");
    }

    #[test]
    fn test_move_missing_source_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = LocalFileSystem::new()
            .move_to(&temp_dir.path().join("nope.mkv"), temp_dir.path())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_only_removes_empty_directories() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("d");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("f"), b"x").unwrap();

        let local = LocalFileSystem::new();
        assert!(local.delete(&dir).is_err());
        local.delete(&dir.join("f")).unwrap();
        local.delete(&dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_create_directory_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let local = LocalFileSystem::new();
        let a = local.create_directory(temp_dir.path(), "Show").unwrap();
        let b = local.create_directory(temp_dir.path(), "Show").unwrap();
        assert_eq!(a, b);
        assert!(a.is_dir());
    }
}
