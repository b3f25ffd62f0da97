//! In-memory [`FileSystem`] for simulation and tests.
//!
//! Paths can be marked busy for a number of mutating calls, which is how
//! lock contention is reproduced without real file handles.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{Entry, EntryKind, FileSystem};
use crate::error::StorageError;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    busy: HashMap<PathBuf, usize>,
    free_space: Option<u64>,
    operations: Vec<(String, PathBuf)>,
}

impl State {
    fn add_dir_all(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            self.nodes
                .entry(ancestor.to_path_buf())
                .or_insert(Node::Dir);
        }
    }

    fn entry(&self, path: &Path) -> Option<Entry> {
        self.nodes.get(path).map(|node| match node {
            Node::Dir => Entry {
                path: path.to_path_buf(),
                kind: EntryKind::Directory,
                size: 0,
            },
            Node::File(data) => Entry {
                path: path.to_path_buf(),
                kind: EntryKind::File,
                size: data.len() as u64,
            },
        })
    }

    /// Logs the call and fails it while `path` is still marked busy.
    fn touch(&mut self, op: &str, path: &Path) -> Result<(), StorageError> {
        self.operations.push((op.to_string(), path.to_path_buf()));
        if let Some(remaining) = self.busy.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Busy {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::Other, "file in use"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    state: Mutex<State>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.lock().add_dir_all(path.as_ref());
    }

    pub fn add_file(&self, path: impl AsRef<Path>, data: &[u8]) {
        let path = path.as_ref();
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            state.add_dir_all(parent);
        }
        state
            .nodes
            .insert(path.to_path_buf(), Node::File(data.to_vec()));
    }

    /// The next `failures` mutating calls on `path` fail as busy.
    pub fn set_busy(&self, path: impl AsRef<Path>, failures: usize) {
        self.lock()
            .busy
            .insert(path.as_ref().to_path_buf(), failures);
    }

    pub fn set_free_space(&self, bytes: Option<u64>) {
        self.lock().free_space = bytes;
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.lock().nodes.contains_key(path)
    }

    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        match self.lock().nodes.get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.lock()
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n, Node::File(_)))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Number of times `op` was attempted on `path`, failed calls included.
    pub fn attempts(&self, op: &str, path: &Path) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|(o, p)| o == op && p == path)
            .count()
    }
}

impl FileSystem for MemoryFileSystem {
    fn resolve(&self, path: &Path) -> Result<Entry, StorageError> {
        self.lock()
            .entry(path)
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn list(&self, dir: &Path) -> Result<Vec<Entry>, StorageError> {
        let state = self.lock();
        match state.nodes.get(dir) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(StorageError::NotADirectory(dir.to_path_buf())),
            None => return Err(StorageError::NotFound(dir.to_path_buf())),
        }
        Ok(state
            .nodes
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| state.entry(p))
            .collect())
    }

    fn walk_files(&self, root: &Path) -> Result<Vec<Entry>, StorageError> {
        let state = self.lock();
        match state.nodes.get(root) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(StorageError::NotADirectory(root.to_path_buf())),
            None => return Err(StorageError::NotFound(root.to_path_buf())),
        }
        Ok(state
            .nodes
            .iter()
            .filter(|(p, n)| matches!(n, Node::File(_)) && p.starts_with(root))
            .filter_map(|(p, _)| state.entry(p))
            .collect())
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, StorageError> {
        let mut state = self.lock();
        state.touch("read", path)?;
        match state.nodes.get(path) {
            Some(Node::File(data)) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(Node::Dir) => Err(StorageError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "is a directory"),
            }),
            None => Err(StorageError::NotFound(path.to_path_buf())),
        }
    }

    fn rename(&self, path: &Path, new_name: &str) -> Result<PathBuf, StorageError> {
        let mut state = self.lock();
        state.touch("rename", path)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;
        let target = parent.join(new_name);
        if state.nodes.contains_key(&target) {
            return Err(StorageError::AlreadyExists(target));
        }
        match state.nodes.remove(path) {
            Some(node @ Node::File(_)) => {
                state.nodes.insert(target.clone(), node);
                Ok(target)
            }
            Some(node) => {
                state.nodes.insert(path.to_path_buf(), node);
                Err(StorageError::NotFound(path.to_path_buf()))
            }
            None => Err(StorageError::NotFound(path.to_path_buf())),
        }
    }

    fn move_to(&self, path: &Path, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        let mut state = self.lock();
        state.touch("move", path)?;
        let name = path
            .file_name()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;
        match state.nodes.get(dest_dir) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => {
                return Err(StorageError::NotADirectory(dest_dir.to_path_buf()))
            }
            None => return Err(StorageError::NotFound(dest_dir.to_path_buf())),
        }
        let target = dest_dir.join(name);
        if state.nodes.contains_key(&target) {
            return Err(StorageError::AlreadyExists(target));
        }
        match state.nodes.remove(path) {
            Some(Node::File(data)) => {
                state.nodes.insert(target.clone(), Node::File(data));
                Ok(target)
            }
            Some(Node::Dir) => {
                state.nodes.insert(path.to_path_buf(), Node::Dir);
                Err(StorageError::NotFound(path.to_path_buf()))
            }
            None => Err(StorageError::NotFound(path.to_path_buf())),
        }
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.touch("delete", path)?;
        let is_dir = match state.nodes.get(path) {
            None => return Err(StorageError::NotFound(path.to_path_buf())),
            Some(node) => matches!(node, Node::Dir),
        };
        if is_dir && state.nodes.keys().any(|p| p.parent() == Some(path)) {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "directory not empty"),
            });
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn create_directory(&self, parent: &Path, name: &str) -> Result<PathBuf, StorageError> {
        let mut state = self.lock();
        match state.nodes.get(parent) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(StorageError::NotADirectory(parent.to_path_buf())),
            None => return Err(StorageError::NotFound(parent.to_path_buf())),
        }
        let path = parent.join(name);
        let existing = state.nodes.get(&path).map(|n| matches!(n, Node::Dir));
        match existing {
            Some(true) => Ok(path),
            Some(false) => Err(StorageError::AlreadyExists(path)),
            None => {
                state.nodes.insert(path.clone(), Node::Dir);
                Ok(path)
            }
        }
    }

    fn available_space(&self, _path: &Path) -> Result<Option<u64>, StorageError> {
        Ok(self.lock().free_space)
    }
}
