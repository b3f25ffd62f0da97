//! Where a file in a drop source should go when no policy decides.

use std::path::Path;

use crate::db::DatabaseError;
use crate::model::{ContentRecord, PlacementRecord, StorageLocation};
use crate::pipeline::PipelineContext;
use crate::policy::sanitize_component;
use crate::storage::same_path_ignore_case;

/// A directory below a location's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub location: StorageLocation,
    /// `/` separated. Empty means the location root.
    pub relative_dir: String,
}

/// Whether `location` can take a `size` byte file from `source`: same
/// cloud unless cross-cloud moves are allowed, online, and with room.
pub fn can_receive(
    ctx: &PipelineContext,
    location: &StorageLocation,
    source: &StorageLocation,
    size: u64,
) -> bool {
    if !ctx.config.allow_cross_cloud_moves && !location.same_cloud(source) {
        log::debug!("Skipping destination {}: different cloud", location.name);
        return false;
    }
    if !ctx.filesystems.is_online(location) {
        log::debug!("Skipping offline destination {}", location.name);
        return false;
    }
    let Ok(fs) = ctx.filesystems.for_location(location) else {
        return false;
    };
    match fs.available_space(&location.root_path) {
        Ok(Some(free)) if free < size => {
            log::debug!(
                "Skipping destination {}: {} bytes free, need {}",
                location.name,
                free,
                size
            );
            false
        }
        Ok(_) => true,
        Err(e) => {
            log::warn!("Cannot query free space on {}: {}", location.name, e);
            false
        }
    }
}

/// First drop-destination location that is not also a drop source and
/// passes [`can_receive`]. Same-cloud candidates win.
pub fn default_location(
    ctx: &PipelineContext,
    source: &StorageLocation,
    size: u64,
) -> Result<Option<StorageLocation>, DatabaseError> {
    let mut candidates: Vec<StorageLocation> = ctx
        .store
        .all_locations()?
        .into_iter()
        .filter(|l| l.is_drop_destination && !l.is_drop_source)
        .collect();
    candidates.sort_by_key(|l| (!l.same_cloud(source), l.id));

    Ok(candidates
        .into_iter()
        .find(|l| can_receive(ctx, l, source, size)))
}

/// Picks the directory for `content`. Prefers the folder that already
/// holds another episode of the same series, newest episode first;
/// otherwise a folder named after the series in the default location.
///
/// `None` when the content is not associated with a series or no
/// destination is available.
pub fn default_target(
    ctx: &PipelineContext,
    content: &ContentRecord,
    placement: &PlacementRecord,
    source: &StorageLocation,
) -> Result<Option<Target>, DatabaseError> {
    let Some(fallback) = default_location(ctx, source, content.file_size)? else {
        log::warn!("No valid destination for placement {}", placement.id);
        return Ok(None);
    };

    if content.hash.is_empty() {
        return Ok(None);
    }
    let associations = ctx.store.associations_for_hash(&content.hash)?;
    let Some(first) = associations.first() else {
        return Ok(None);
    };
    let Some(series) = ctx.store.get_series(first.series_id)? else {
        return Ok(None);
    };

    let current_dir = source.full_path(placement.relative_dir());
    for episode in ctx.store.episodes_for_series(series.id)? {
        let episode_links = ctx.store.associations_for_episode(episode.id)?;
        if episode_links
            .iter()
            .any(|a| a.series_id != episode_links[0].series_id)
        {
            // Crossover episode; its files may live with the other series.
            continue;
        }

        for link in &episode_links {
            let Some(sibling) = ctx.store.content_by_hash(&link.hash)? else {
                continue;
            };
            if sibling.id == content.id {
                continue;
            }
            if let Some(target) = sibling_directory(ctx, &sibling, source, &current_dir)? {
                return Ok(Some(target));
            }
        }
    }

    Ok(Some(Target {
        location: fallback,
        relative_dir: sanitize_component(&series.name),
    }))
}

/// Directory of the sibling's first usable placement.
fn sibling_directory(
    ctx: &PipelineContext,
    sibling: &ContentRecord,
    source: &StorageLocation,
    current_dir: &Path,
) -> Result<Option<Target>, DatabaseError> {
    for place in ctx.store.placements_for_content(sibling.id)? {
        let Some(location) = ctx.store.get_location(place.location_id)? else {
            continue;
        };
        if location.is_drop_source {
            continue;
        }
        if !location.same_cloud(source) && !ctx.config.allow_cross_cloud_moves {
            continue;
        }
        let dir = location.full_path(place.relative_dir());
        if same_path_ignore_case(&dir, current_dir) {
            continue;
        }
        let resolves = ctx
            .filesystems
            .for_location(&location)
            .ok()
            .and_then(|fs| fs.resolve(&dir).ok())
            .is_some_and(|e| e.is_dir());
        if !resolves {
            continue;
        }
        return Ok(Some(Target {
            relative_dir: place.relative_dir().to_string(),
            location,
        }));
    }
    Ok(None)
}
