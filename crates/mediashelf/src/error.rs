use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediashelfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid location {id}: {reason}")]
    InvalidLocation { id: i64, reason: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Errors raised by the filesystem abstraction.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Path already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("File is busy '{path}': {source}")]
    Busy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No filesystem registered for cloud provider '{0}'")]
    Unavailable(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(windows)]
const BUSY_OS_CODES: &[i32] = &[32, 33]; // sharing / lock violation
#[cfg(not(windows))]
const BUSY_OS_CODES: &[i32] = &[16, 26]; // EBUSY, ETXTBSY

fn is_busy(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err
            .raw_os_error()
            .map(|code| BUSY_OS_CODES.contains(&code))
            .unwrap_or(false)
}

impl StorageError {
    /// Classifies an IO error raised while touching `path`.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        if is_busy(&err) {
            return StorageError::Busy {
                path: path.to_path_buf(),
                source: err,
            };
        }
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_path_buf()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_path_buf()),
            _ => StorageError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, StorageError::Busy { .. })
    }

    /// Busy files and transient IO failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Busy { .. }
            | StorageError::Io { .. }
            | StorageError::CreateDirectory { .. } => true,
            StorageError::MoveFile { source, .. } => source.kind() != io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage failed: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to encode job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Watch error: {0}")]
    WatchError(String),
}

pub type Result<T> = std::result::Result<T, MediashelfError>;
