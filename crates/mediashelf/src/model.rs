//! Records tracked by the library.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A configured root that media lives under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub id: i64,
    pub name: String,
    pub root_path: PathBuf,
    /// `None` means the local filesystem.
    pub cloud_id: Option<String>,
    pub is_drop_source: bool,
    pub is_drop_destination: bool,
}

impl StorageLocation {
    /// Joins a stored relative path (with `/` separators) onto the root.
    pub fn full_path(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split(['/', '\\'])
            .filter(|c| !c.is_empty())
            .fold(self.root_path.clone(), |acc, c| acc.join(c))
    }

    /// Inverse of [`full_path`](Self::full_path). `None` when `path` is
    /// not below the root.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root_path).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    pub fn same_cloud(&self, other: &StorageLocation) -> bool {
        self.cloud_id == other.cloud_id
    }
}

/// One distinct piece of content, identified by its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: i64,
    /// BLAKE3 hex digest. Empty for rows that were never hashed.
    pub hash: String,
    pub file_size: u64,
    pub duration_ms: Option<u64>,
    pub media_info: Option<String>,
    pub is_ignored: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a piece of content physically lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub id: i64,
    pub location_id: i64,
    /// Relative to the location root, `/` separated.
    pub relative_path: String,
    pub content_id: i64,
}

impl PlacementRecord {
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.relative_path)
    }

    /// Directory part of the relative path; empty at the location root.
    pub fn relative_dir(&self) -> &str {
        match self.relative_path.rfind(['/', '\\']) {
            Some(idx) => &self.relative_path[..idx],
            None => "",
        }
    }
}

/// Replaces `\` separators so equal paths compare equal.
pub fn normalize_relative(path: &str) -> String {
    path.replace('\\', "/")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub episode_count: u32,
    #[serde(default)]
    pub episodes_with_files: u32,
    #[serde(default)]
    pub missing_episodes: u32,
    #[serde(default)]
    pub latest_local_air_date: Option<NaiveDate>,
    #[serde(default)]
    pub stats_updated_at: Option<DateTime<Utc>>,
}

impl Series {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            episode_count: 0,
            episodes_with_files: 0,
            missing_episodes: 0,
            latest_local_air_date: None,
            stats_updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub series_id: i64,
    pub number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub air_date: Option<NaiveDate>,
}

/// Links content (by hash) to a catalog episode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeAssociation {
    pub hash: String,
    pub episode_id: i64,
    /// Series the link was registered under. Differs between links of
    /// the same episode for crossover releases.
    pub series_id: i64,
}

/// Throttle record for recurring work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub name: String,
    pub last_run: Option<DateTime<Utc>>,
    pub min_interval_secs: i64,
}
