//! Verifies the whole record set against the filesystems and repairs it.
//!
//! The sweep runs in a fixed order:
//!
//! 1. Placements whose location is gone, or whose file no longer
//!    resolves, are removed. Offline locations are left alone.
//! 2. Content records that were never hashed are removed with their
//!    placements, along with content left without any placement.
//! 3. Content records sharing a hash are merged into one survivor.
//! 4. Placements pointing at the same file through differently
//!    separated paths are collapsed onto the lowest id.
//! 5. Series affected by removals get their stats recomputed.
//! 6. Associations to unknown episodes are dropped and content without a
//!    usable association is sent back through ProcessFile.
//!
//! A second run without filesystem changes mutates nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, info_span, warn};

use crate::db::DatabaseError;
use crate::model::{normalize_relative, ContentRecord};
use crate::pipeline::PipelineContext;
use crate::placement::remove_placement;
use crate::queue::{CancellationToken, JobKind};
use crate::sanitize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub missing_location_placements: usize,
    pub stale_placements: usize,
    pub unhashed_contents: usize,
    pub orphaned_contents: usize,
    /// Loser records folded into a survivor.
    pub merged_contents: usize,
    pub duplicate_placements: usize,
    pub dangling_associations: usize,
    pub series_refreshed: usize,
    pub reprocess_requested: usize,
    /// Set when the token stopped the sweep early.
    pub cancelled: bool,
}

impl ReconcileReport {
    /// Records changed by this run. Follow-up jobs are not counted.
    pub fn mutations(&self) -> usize {
        self.missing_location_placements
            + self.stale_placements
            + self.unhashed_contents
            + self.orphaned_contents
            + self.merged_contents
            + self.duplicate_placements
            + self.dangling_associations
    }
}

type Step =
    fn(&PipelineContext, &mut ReconcileReport, &mut BTreeSet<i64>) -> Result<(), DatabaseError>;

pub fn reconcile(
    ctx: &PipelineContext,
    token: &CancellationToken,
) -> Result<ReconcileReport, DatabaseError> {
    let _span = info_span!("reconcile").entered();
    let mut report = ReconcileReport::default();
    let mut touched = BTreeSet::new();

    let steps: [Step; 4] = [
        remove_stale_placements,
        remove_unusable_contents,
        merge_duplicate_contents,
        collapse_duplicate_placements,
    ];
    for step in steps {
        if token.is_cancelled() {
            report.cancelled = true;
            break;
        }
        step(ctx, &mut report, &mut touched)?;
    }

    for series_id in &touched {
        ctx.enqueue(JobKind::UpdateSeriesStats {
            series_id: *series_id,
        });
    }
    report.series_refreshed = touched.len();

    if token.is_cancelled() {
        report.cancelled = true;
    } else {
        repair_associations(ctx, &mut report)?;
    }

    info!(
        mutations = report.mutations(),
        reprocess = report.reprocess_requested,
        "Reconcile finished"
    );
    Ok(report)
}

fn remove_stale_placements(
    ctx: &PipelineContext,
    report: &mut ReconcileReport,
    touched: &mut BTreeSet<i64>,
) -> Result<(), DatabaseError> {
    let locations: HashMap<i64, _> = ctx
        .store
        .all_locations()?
        .into_iter()
        .map(|l| (l.id, l))
        .collect();
    let mut online = HashMap::new();

    for placement in ctx.store.all_placements()? {
        let Some(location) = locations.get(&placement.location_id) else {
            warn!(placement_id = placement.id, "Location missing, removing placement");
            if remove_placement(ctx, placement.id, touched)?.placement_removed {
                report.missing_location_placements += 1;
            }
            continue;
        };
        let is_online = *online
            .entry(location.id)
            .or_insert_with(|| ctx.filesystems.is_online(location));
        if !is_online {
            continue;
        }
        let Ok(fs) = ctx.filesystems.for_location(location) else {
            continue;
        };

        match fs.resolve(&location.full_path(&placement.relative_path)) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(placement_id = placement.id, "File gone, removing placement");
                if remove_placement(ctx, placement.id, touched)?.placement_removed {
                    report.stale_placements += 1;
                }
            }
            Err(e) => warn!(placement_id = placement.id, "Cannot resolve placement: {}", e),
        }
    }
    Ok(())
}

fn remove_unusable_contents(
    ctx: &PipelineContext,
    report: &mut ReconcileReport,
    _touched: &mut BTreeSet<i64>,
) -> Result<(), DatabaseError> {
    for content in ctx.store.all_contents()? {
        let placements = ctx.store.placements_for_content(content.id)?;
        if content.hash.is_empty() {
            ctx.store.transaction(|tx| {
                for placement in &placements {
                    tx.delete_placement(placement.id)?;
                }
                tx.delete_content(content.id)
            })?;
            report.unhashed_contents += 1;
        } else if placements.is_empty() {
            ctx.store.transaction(|tx| tx.delete_content(content.id))?;
            ctx.enqueue(JobKind::DeleteExternalReference {
                hash: content.hash.clone(),
                size: content.file_size,
            });
            report.orphaned_contents += 1;
        }
    }
    Ok(())
}

/// Survivor first: most placements, then lowest id.
fn rank_duplicates(group: &mut [(ContentRecord, usize)]) {
    group.sort_by(|(a, a_count), (b, b_count)| b_count.cmp(a_count).then(a.id.cmp(&b.id)));
}

fn merge_duplicate_contents(
    ctx: &PipelineContext,
    report: &mut ReconcileReport,
    _touched: &mut BTreeSet<i64>,
) -> Result<(), DatabaseError> {
    let mut groups: BTreeMap<String, Vec<(ContentRecord, usize)>> = BTreeMap::new();
    for content in ctx.store.all_contents()? {
        if content.hash.is_empty() {
            continue;
        }
        let count = ctx.store.placements_for_content(content.id)?.len();
        groups.entry(content.hash.clone()).or_default().push((content, count));
    }

    for (hash, mut group) in groups {
        if group.len() < 2 {
            continue;
        }
        rank_duplicates(&mut group);
        let mut records = group.into_iter().map(|(c, _)| c);
        let Some(mut survivor) = records.next() else {
            continue;
        };
        let losers: Vec<ContentRecord> = records.collect();

        let merged = ctx.store.transaction(|tx| {
            let mut changed = false;
            for loser in &losers {
                for mut placement in tx.placements_for_content(loser.id)? {
                    placement.content_id = survivor.id;
                    tx.update_placement(&placement)?;
                }
                if survivor.duration_ms.is_none() && loser.duration_ms.is_some() {
                    survivor.duration_ms = loser.duration_ms;
                    changed = true;
                }
                if survivor.media_info.is_none() && loser.media_info.is_some() {
                    survivor.media_info = loser.media_info.clone();
                    changed = true;
                }
                tx.delete_content(loser.id)?;
            }
            if changed {
                tx.update_content(&mut survivor)?;
            }
            Ok(losers.len())
        })?;

        info!(
            survivor = survivor.id,
            merged,
            hash = sanitize::short_hash(&hash),
            "Merged duplicate content records"
        );
        report.merged_contents += merged;
    }
    Ok(())
}

fn collapse_duplicate_placements(
    ctx: &PipelineContext,
    report: &mut ReconcileReport,
    touched: &mut BTreeSet<i64>,
) -> Result<(), DatabaseError> {
    let mut placements = ctx.store.all_placements()?;
    placements.sort_by_key(|p| p.id);

    let mut seen: BTreeSet<(i64, String)> = BTreeSet::new();
    for placement in placements {
        let key = (placement.location_id, normalize_relative(&placement.relative_path));
        if seen.insert(key) {
            continue;
        }
        debug!(placement_id = placement.id, "Duplicate placement, removing");
        if remove_placement(ctx, placement.id, touched)?.placement_removed {
            report.duplicate_placements += 1;
        }
    }
    Ok(())
}

fn repair_associations(
    ctx: &PipelineContext,
    report: &mut ReconcileReport,
) -> Result<(), DatabaseError> {
    let mut known_episodes: HashMap<i64, bool> = HashMap::new();
    let mut episode_exists = |id: i64| -> Result<bool, DatabaseError> {
        if let Some(exists) = known_episodes.get(&id) {
            return Ok(*exists);
        }
        let exists = ctx.store.get_episode(id)?.is_some();
        known_episodes.insert(id, exists);
        Ok(exists)
    };

    for association in ctx.store.all_associations()? {
        if !episode_exists(association.episode_id)? {
            ctx.store
                .delete_association(&association.hash, association.episode_id)?;
            report.dangling_associations += 1;
        }
    }

    for content in ctx.store.all_contents()? {
        if content.hash.is_empty() || content.is_ignored {
            continue;
        }
        let mut valid = false;
        for association in ctx.store.associations_for_hash(&content.hash)? {
            if episode_exists(association.episode_id)? {
                valid = true;
                break;
            }
        }
        if !valid {
            ctx.enqueue(JobKind::ProcessFile {
                content_id: content.id,
            });
            report.reprocess_requested += 1;
        }
    }
    Ok(())
}
