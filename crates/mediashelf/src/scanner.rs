//! Discovers new, known and vanished files under storage locations.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glob::MatchOptions;
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};
use tracing::{debug, error, info, info_span, warn};

use crate::db::DatabaseError;
use crate::error::WorkerError;
use crate::model::{PlacementRecord, StorageLocation};
use crate::pipeline::{PipelineConfig, PipelineContext};
use crate::placement::remove_placement;
use crate::queue::{CancellationToken, JobKind};
use crate::sanitize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounts {
    /// Files considered, after trash and ignore filtering.
    pub files: usize,
    /// New video files handed to hashing.
    pub videos: usize,
}

impl std::ops::AddAssign for ScanCounts {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.videos += other.videos;
    }
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// True when any component of `relative_path` is a trash folder.
pub fn in_trash(config: &PipelineConfig, relative_path: &str) -> bool {
    relative_path
        .split(['/', '\\'])
        .any(|c| config.trash_markers.iter().any(|m| c.eq_ignore_ascii_case(m)))
}

pub fn matches_ignore_pattern(config: &PipelineConfig, relative_path: &str) -> bool {
    config
        .ignore_patterns
        .iter()
        .any(|p| p.matches_with(relative_path, GLOB_OPTIONS))
}

/// Video by configured extension, falling back to the MIME type.
pub fn is_video(config: &PipelineConfig, path: &Path) -> bool {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| config.is_video_extension(e));
    by_extension
        || mime_guess::from_path(path)
            .first()
            .is_some_and(|m| m.type_().as_str() == "video")
}

/// Lowercased full paths of placements whose content is marked ignored.
fn ignored_paths(ctx: &PipelineContext) -> Result<HashSet<String>, DatabaseError> {
    let mut paths = HashSet::new();
    for content in ctx.store.all_contents()?.into_iter().filter(|c| c.is_ignored) {
        for placement in ctx.store.placements_for_content(content.id)? {
            if let Some(location) = ctx.store.get_location(placement.location_id)? {
                let full = location.full_path(&placement.relative_path);
                paths.insert(full.to_string_lossy().to_lowercase());
            }
        }
    }
    Ok(paths)
}

/// Walks one location and enqueues work for what it finds.
///
/// New videos get a HashFile job. Known files in a drop source get a
/// MoveFile job so they are placed again. Offline locations are skipped.
pub fn scan_location(
    ctx: &PipelineContext,
    location: &StorageLocation,
    token: &CancellationToken,
) -> Result<ScanCounts, DatabaseError> {
    let ignored = ignored_paths(ctx)?;
    scan_with(ctx, location, &ignored, token)
}

fn scan_with(
    ctx: &PipelineContext,
    location: &StorageLocation,
    ignored: &HashSet<String>,
    token: &CancellationToken,
) -> Result<ScanCounts, DatabaseError> {
    let _span = info_span!(
        "scan",
        location = %location.name,
        root = %sanitize::redact_path(&location.root_path)
    )
    .entered();
    let mut counts = ScanCounts::default();

    if !ctx.filesystems.is_online(location) {
        warn!("Location offline, skipping scan");
        return Ok(counts);
    }
    let fs = match ctx.filesystems.for_location(location) {
        Ok(fs) => fs,
        Err(e) => {
            warn!("No filesystem for location: {}", e);
            return Ok(counts);
        }
    };

    let known: HashMap<PathBuf, PlacementRecord> = ctx
        .store
        .placements_for_location(location.id)?
        .into_iter()
        .map(|p| (location.full_path(&p.relative_path), p))
        .collect();

    let entries = match fs.walk_files(&location.root_path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Walk failed: {}", e);
            return Ok(counts);
        }
    };

    for entry in entries {
        if token.is_cancelled() {
            info!("Scan cancelled after {} files", counts.files);
            break;
        }
        let Some(relative) = location.relative_path(&entry.path) else {
            continue;
        };
        if in_trash(&ctx.config, &relative)
            || matches_ignore_pattern(&ctx.config, &relative)
            || ignored.contains(&entry.path.to_string_lossy().to_lowercase())
        {
            debug!(file = %relative, "Skipping");
            continue;
        }
        counts.files += 1;

        if let Some(placement) = known.get(&entry.path) {
            if location.is_drop_source {
                ctx.enqueue(JobKind::MoveFile {
                    placement_id: placement.id,
                });
            }
            continue;
        }

        if !is_video(&ctx.config, &entry.path) {
            continue;
        }
        counts.videos += 1;
        ctx.enqueue(JobKind::HashFile {
            location_id: location.id,
            relative_path: relative,
            force: false,
        });
    }

    info!(files = counts.files, videos = counts.videos, "Scan finished");
    Ok(counts)
}

fn scan_each<'a>(
    ctx: &PipelineContext,
    locations: impl IntoIterator<Item = &'a StorageLocation>,
    token: &CancellationToken,
) -> Result<ScanCounts, DatabaseError> {
    let ignored = ignored_paths(ctx)?;
    let mut total = ScanCounts::default();
    for location in locations {
        if token.is_cancelled() {
            break;
        }
        total += scan_with(ctx, location, &ignored, token)?;
    }
    Ok(total)
}

pub fn scan_all_drop_sources(
    ctx: &PipelineContext,
    token: &CancellationToken,
) -> Result<ScanCounts, DatabaseError> {
    let locations = ctx.store.all_locations()?;
    scan_each(ctx, locations.iter().filter(|l| l.is_drop_source), token)
}

/// Scans every location after dropping placements whose location is gone.
pub fn scan_new_files(
    ctx: &PipelineContext,
    token: &CancellationToken,
) -> Result<ScanCounts, DatabaseError> {
    let locations = ctx.store.all_locations()?;
    let location_ids: HashSet<i64> = locations.iter().map(|l| l.id).collect();

    let mut touched = BTreeSet::new();
    for placement in ctx.store.all_placements()? {
        if !location_ids.contains(&placement.location_id) {
            warn!(
                placement_id = placement.id,
                location_id = placement.location_id,
                "Placement references a missing location, removing"
            );
            remove_placement(ctx, placement.id, &mut touched)?;
        }
    }
    for series_id in touched {
        ctx.enqueue(JobKind::UpdateSeriesStats { series_id });
    }

    scan_each(ctx, &locations, token)
}

/// Polls local drop sources and calls `callback` with the location and
/// relative path of each new video file. Cloud-backed locations cannot be
/// polled and are left to scheduled scans.
pub fn watch<F>(
    locations: &[StorageLocation],
    config: &PipelineConfig,
    debounce: Duration,
    callback: F,
    shutdown: Arc<AtomicBool>,
) -> Result<(), WorkerError>
where
    F: Fn(&StorageLocation, String) + Send + 'static,
{
    let watched: Vec<StorageLocation> = locations
        .iter()
        .filter(|l| l.is_drop_source)
        .filter(|l| {
            if l.cloud_id.is_some() {
                warn!(location = %l.name, "Cannot watch cloud location");
                return false;
            }
            true
        })
        .cloned()
        .collect();
    if watched.is_empty() {
        info!("No local drop sources to watch");
        return Ok(());
    }

    // PollWatcher works on network mounts and in containers.
    let poll_config = NotifyConfig::default().with_poll_interval(debounce);
    let debouncer_config = DebouncerConfig::default()
        .with_timeout(Duration::from_millis(500))
        .with_notify_config(poll_config);

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx)
        .map_err(|e| WorkerError::WatchError(e.to_string()))?;

    for location in &watched {
        debouncer
            .watcher()
            .watch(&location.root_path, RecursiveMode::Recursive)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;
        info!(root = %sanitize::redact_path(&location.root_path), "Watching drop source");
    }

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Watch mode shutting down");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(events)) => {
                for event in events {
                    if !matches!(event.kind, DebouncedEventKind::Any) || !event.path.is_file() {
                        continue;
                    }
                    let Some((location, relative)) = watched
                        .iter()
                        .find_map(|l| l.relative_path(&event.path).map(|r| (l, r)))
                    else {
                        continue;
                    };
                    if in_trash(config, &relative)
                        || matches_ignore_pattern(config, &relative)
                        || !is_video(config, &event.path)
                    {
                        continue;
                    }
                    debug!(file = %relative, "New video detected");
                    callback(location, relative);
                }
            }
            Ok(Err(e)) => warn!("Watch error: {:?}", e),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                error!("Watch channel disconnected");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.ignore_patterns = vec![glob::Pattern::new("**/sample/*").unwrap()];
        config
    }

    #[test]
    fn test_trash_marker_any_component() {
        let config = config();
        assert!(in_trash(&config, "$RECYCLE.BIN/deleted.mkv"));
        assert!(in_trash(&config, "show/.trashes/x.mkv"));
        assert!(!in_trash(&config, "show/recycle/x.mkv"));
    }

    #[test]
    fn test_ignore_patterns_are_case_insensitive() {
        let config = config();
        assert!(matches_ignore_pattern(&config, "Show/Sample/clip.mkv"));
        assert!(!matches_ignore_pattern(&config, "Show/ep01.mkv"));
    }

    #[test]
    fn test_video_classification() {
        let config = config();
        assert!(is_video(&config, Path::new("/drop/show.mkv")));
        assert!(is_video(&config, Path::new("/drop/SHOW.MP4")));
        assert!(!is_video(&config, Path::new("/drop/show.srt")));
        assert!(!is_video(&config, Path::new("/drop/notes.txt")));
    }
}
