//! Operator actions. Each returns an empty string on success and a
//! human-readable message otherwise.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::placement::remove_placement;
use crate::queue::JobKind;
use crate::storage::remove_empty_directories;

use super::context::PipelineContext;

fn enqueue_stats(ctx: &PipelineContext, touched: BTreeSet<i64>) {
    for series_id in touched {
        ctx.enqueue(JobKind::UpdateSeriesStats { series_id });
    }
}

/// Forgets a location and every placement under it. Files on disk are
/// left alone.
pub fn delete_location(ctx: &PipelineContext, location_id: i64) -> String {
    let location = match ctx.store.get_location(location_id) {
        Ok(Some(location)) => location,
        Ok(None) => return format!("Location {} not found", location_id),
        Err(e) => return e.to_string(),
    };

    let placements = match ctx.store.placements_for_location(location_id) {
        Ok(placements) => placements,
        Err(e) => return e.to_string(),
    };

    let mut touched = BTreeSet::new();
    let mut errors = Vec::new();
    for placement in placements {
        if let Err(e) = remove_placement(ctx, placement.id, &mut touched) {
            warn!(placement_id = placement.id, "Failed to remove placement: {}", e);
            errors.push(e.to_string());
        }
    }
    enqueue_stats(ctx, touched);

    if !errors.is_empty() {
        return errors.join("; ");
    }
    if let Err(e) = ctx.store.transaction(|tx| tx.delete_location(location_id)) {
        return e.to_string();
    }
    info!(location = %location.name, "Deleted location");
    String::new()
}

/// Deletes every location served by `cloud_id` and drops its filesystem.
pub fn delete_cloud_provider(ctx: &PipelineContext, cloud_id: &str) -> String {
    let locations = match ctx.store.all_locations() {
        Ok(locations) => locations,
        Err(e) => return e.to_string(),
    };

    let errors: Vec<String> = locations
        .iter()
        .filter(|l| l.cloud_id.as_deref() == Some(cloud_id))
        .map(|l| delete_location(ctx, l.id))
        .filter(|message| !message.is_empty())
        .collect();

    if ctx.filesystems.unregister(cloud_id) {
        info!(cloud_id, "Unregistered cloud filesystem");
    }
    errors.join("; ")
}

/// Deletes a placement's file from disk, then its record. A file that is
/// already gone still has its record removed.
pub fn delete_placement_file(ctx: &PipelineContext, placement_id: i64) -> String {
    let placement = match ctx.store.get_placement(placement_id) {
        Ok(Some(placement)) => placement,
        Ok(None) => return format!("Placement {} not found", placement_id),
        Err(e) => return e.to_string(),
    };
    let location = match ctx.store.get_location(placement.location_id) {
        Ok(Some(location)) => location,
        Ok(None) => return format!("Location {} not found", placement.location_id),
        Err(e) => return e.to_string(),
    };
    let fs = match ctx.filesystems.for_location(&location) {
        Ok(fs) => fs,
        Err(e) => return e.to_string(),
    };

    let path = location.full_path(&placement.relative_path);
    match fs.delete(&path) {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return format!("Could not delete file: {}", e),
    }

    let mut touched = BTreeSet::new();
    if let Err(e) = remove_placement(ctx, placement_id, &mut touched) {
        return e.to_string();
    }
    enqueue_stats(ctx, touched);

    if location.is_drop_source {
        if let Err(e) = remove_empty_directories(fs.as_ref(), &location.root_path) {
            warn!("Failed to clean drop source: {}", e);
        }
    }
    String::new()
}
