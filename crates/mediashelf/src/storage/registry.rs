use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{FileSystem, LocalFileSystem};
use crate::error::StorageError;
use crate::model::StorageLocation;

/// Maps a location's cloud provider to the filesystem serving it.
/// Locations without a cloud id use the local filesystem.
pub struct FileSystemRegistry {
    local: Arc<dyn FileSystem>,
    clouds: RwLock<HashMap<String, Arc<dyn FileSystem>>>,
}

impl FileSystemRegistry {
    pub fn new(local: Arc<dyn FileSystem>) -> Self {
        Self {
            local,
            clouds: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_only() -> Self {
        Self::new(Arc::new(LocalFileSystem::new()))
    }

    pub fn register(&self, cloud_id: impl Into<String>, fs: Arc<dyn FileSystem>) {
        if let Ok(mut clouds) = self.clouds.write() {
            clouds.insert(cloud_id.into(), fs);
        }
    }

    pub fn unregister(&self, cloud_id: &str) -> bool {
        self.clouds
            .write()
            .map(|mut clouds| clouds.remove(cloud_id).is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, cloud_id: Option<&str>) -> Result<Arc<dyn FileSystem>, StorageError> {
        match cloud_id {
            None => Ok(Arc::clone(&self.local)),
            Some(id) => self
                .clouds
                .read()
                .ok()
                .and_then(|clouds| clouds.get(id).cloned())
                .ok_or_else(|| StorageError::Unavailable(id.to_string())),
        }
    }

    pub fn for_location(&self, location: &StorageLocation) -> Result<Arc<dyn FileSystem>, StorageError> {
        self.get(location.cloud_id.as_deref())
    }

    /// A location is online when its root resolves to a directory.
    pub fn is_online(&self, location: &StorageLocation) -> bool {
        match self.for_location(location) {
            Ok(fs) => fs
                .resolve(&location.root_path)
                .map(|e| e.is_dir())
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
