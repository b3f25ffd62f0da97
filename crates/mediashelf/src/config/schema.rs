use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::StorageLocation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Defaults to `~/.mediashelf/data/mediashelf.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub policies: PoliciesConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// A config with every section at its default and no locations.
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            worker_count: default_worker_count(),
            queue: QueueConfig::default(),
            locations: Vec::new(),
            scan: ScanConfig::default(),
            placement: PlacementConfig::default(),
            policies: PoliciesConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempts before a retryable job is parked as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub id: i64,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub cloud_id: Option<String>,
    #[serde(default)]
    pub drop_source: bool,
    #[serde(default)]
    pub drop_destination: bool,
}

impl LocationConfig {
    pub fn to_location(&self) -> StorageLocation {
        StorageLocation {
            id: self.id,
            name: self.name.clone(),
            root_path: PathBuf::from(&self.path),
            cloud_id: self.cloud_id.clone(),
            is_drop_source: self.drop_source,
            is_drop_destination: self.drop_destination,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Extensions (without dot, any case) treated as video.
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    #[serde(default = "default_subtitle_extensions")]
    pub subtitle_extensions: Vec<String>,
    /// Path components that mark a file as deleted.
    #[serde(default = "default_trash_markers")]
    pub trash_markers: Vec<String>,
    /// Glob patterns matched against the path relative to the location root.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub watch: bool,
    #[serde(default = "default_watch_debounce")]
    pub watch_debounce_ms: u64,
}

fn default_video_extensions() -> Vec<String> {
    [
        "mkv", "mp4", "avi", "mov", "wmv", "m4v", "ogm", "ts", "webm", "flv", "mpg", "mpeg",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_subtitle_extensions() -> Vec<String> {
    ["srt", "ass", "ssa", "sub", "idx", "vtt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_trash_markers() -> Vec<String> {
    vec!["$RECYCLE.BIN".to_string(), ".Trashes".to_string()]
}

fn default_watch_debounce() -> u64 {
    2000
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            video_extensions: default_video_extensions(),
            subtitle_extensions: default_subtitle_extensions(),
            trash_markers: default_trash_markers(),
            ignore_patterns: Vec::new(),
            watch: false,
            watch_debounce_ms: default_watch_debounce(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Waits between attempts of one filesystem step.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_true")]
    pub rename_enabled: bool,
    #[serde(default = "default_true")]
    pub move_enabled: bool,
    #[serde(default)]
    pub allow_cross_cloud_moves: bool,
}

fn default_retry_delays() -> Vec<u64> {
    vec![750, 3000, 5000]
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            retry_delays_ms: default_retry_delays(),
            rename_enabled: true,
            move_enabled: true,
            allow_cross_cloud_moves: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesConfig {
    /// Policy id tried before all others.
    #[serde(default)]
    pub default: Option<String>,
    /// Lower runs earlier. Unlisted policies rank last.
    #[serde(default)]
    pub priorities: HashMap<String, u32>,
    #[serde(default)]
    pub disabled: Vec<String>,
    #[serde(default)]
    pub template: TemplateConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// e.g. `$series - $episode - $title`. The extension is appended.
    #[serde(default)]
    pub filename: Option<String>,
    /// e.g. `$series/Season $y`. Relative to the destination root.
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_tick")]
    pub tick_seconds: u64,
    #[serde(default = "default_scan_minutes")]
    pub scan_interval_minutes: u64,
    #[serde(default = "default_daily_hours")]
    pub reconcile_interval_hours: u64,
    #[serde(default = "default_daily_hours")]
    pub external_sync_interval_hours: u64,
    #[serde(default = "default_true")]
    pub daily_filters: bool,
}

fn default_tick() -> u64 {
    60
}

fn default_scan_minutes() -> u64 {
    60
}

fn default_daily_hours() -> u64 {
    24
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick(),
            scan_interval_minutes: default_scan_minutes(),
            reconcile_interval_hours: default_daily_hours(),
            external_sync_interval_hours: default_daily_hours(),
            daily_filters: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_default_when_missing() {
        let config: Config = serde_json::from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.placement.retry_delays_ms, vec![750, 3000, 5000]);
        assert!(config.placement.rename_enabled);
        assert!(!config.placement.allow_cross_cloud_moves);
        assert!(config.scan.trash_markers.contains(&"$RECYCLE.BIN".to_string()));
        assert!(config.worker_count >= 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_location_config_maps_flags() {
        let loc = LocationConfig {
            id: 3,
            name: "Drop".into(),
            path: "/drop".into(),
            cloud_id: None,
            drop_source: true,
            drop_destination: false,
        }
        .to_location();
        assert_eq!(loc.root_path, PathBuf::from("/drop"));
        assert!(loc.is_drop_source);
        assert!(!loc.is_drop_destination);
    }

    #[test]
    fn test_explicit_database_path_wins() {
        let mut config = Config::new();
        config.database_path = Some("/tmp/x.db".into());
        assert_eq!(config.database_path(), Some(PathBuf::from("/tmp/x.db")));
    }
}
