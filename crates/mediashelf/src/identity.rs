//! Content identity: hashing files and tying paths to content records.

use std::collections::BTreeSet;
use std::io::{self, Read};
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, info_span};

use crate::db::catalog_repo;
use crate::error::StorageError;
use crate::model::{normalize_relative, EpisodeAssociation};
use crate::pipeline::{JobOutcome, PipelineContext};
use crate::placement::remove_placement;
use crate::queue::JobKind;
use crate::sanitize;
use crate::storage::FileSystem;

const HASH_BUFFER: usize = 64 * 1024;

/// BLAKE3 hex digest of everything `reader` yields.
pub fn hash_reader(reader: &mut dyn Read) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn hash_file(fs: &dyn FileSystem, path: &Path) -> Result<String, StorageError> {
    let mut reader = fs.open_read(path)?;
    hash_reader(&mut reader).map_err(|e| StorageError::from_io(path, e))
}

/// Result of identifying one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub content_id: i64,
    pub placement_id: i64,
    pub hash: String,
    /// `false` when the stored hash was trusted.
    pub rehashed: bool,
    pub created_content: bool,
}

/// Hashes the file at `relative_path` and records where it lives.
///
/// A known path with unchanged size and an existing hash is not read
/// again unless `force` is set. When the content at a known path changed,
/// the placement moves to the record for the new hash and the old record
/// is removed if nothing else points to it. A ProcessFile job follows
/// every registration.
pub fn register(
    ctx: &PipelineContext,
    location_id: i64,
    relative_path: &str,
    force: bool,
) -> Result<Registration, JobOutcome> {
    let relative_path = normalize_relative(relative_path);
    let location = ctx
        .store
        .get_location(location_id)?
        .ok_or_else(|| JobOutcome::structural(format!("location {} not found", location_id)))?;
    if !ctx.filesystems.is_online(&location) {
        return Err(JobOutcome::retryable(format!("location {} is offline", location.name)));
    }
    let fs = ctx.filesystems.for_location(&location)?;
    let path = location.full_path(&relative_path);
    let _span = info_span!(
        "identify",
        file = %sanitize::redact_path(&path),
        path_id = %sanitize::hash_path(&path)
    )
    .entered();

    let existing = ctx.store.placement_at(location_id, &relative_path)?;
    let entry = match fs.resolve(&path) {
        Ok(entry) if entry.is_file() => entry,
        Ok(_) => return Err(JobOutcome::structural("path is not a file")),
        Err(e) if e.is_not_found() => {
            if let Some(stale) = existing {
                let mut touched = BTreeSet::new();
                remove_placement(ctx, stale.id, &mut touched)?;
                enqueue_stats(ctx, &touched);
            }
            return Err(JobOutcome::structural("file vanished before hashing"));
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(placement) = &existing {
        if let Some(content) = ctx.store.get_content(placement.content_id)? {
            if !force && !content.hash.is_empty() && content.file_size == entry.size {
                debug!("Size unchanged, keeping stored hash");
                ctx.enqueue(JobKind::ProcessFile {
                    content_id: content.id,
                });
                return Ok(Registration {
                    content_id: content.id,
                    placement_id: placement.id,
                    hash: content.hash,
                    rehashed: false,
                    created_content: false,
                });
            }
        }
    }

    let hash = hash_file(fs.as_ref(), &path)?;
    let size = entry.size;

    let (registration, orphan) = ctx.store.transaction(|tx| {
        let placement = tx.placement_at(location_id, &relative_path)?;
        let previous = match &placement {
            Some(p) => tx.get_content(p.content_id)?,
            None => None,
        };

        let mut created_content = false;
        let content = match tx.content_by_hash(&hash)? {
            Some(content) => content,
            None => match previous.clone() {
                // An unhashed legacy record at this path takes the hash.
                Some(mut legacy) if legacy.hash.is_empty() => {
                    legacy.hash = hash.clone();
                    legacy.file_size = size;
                    tx.update_content(&mut legacy)?;
                    legacy
                }
                _ => {
                    created_content = true;
                    tx.insert_content(&hash, size)?
                }
            },
        };

        let mut orphan = None;
        let placement_id = match placement {
            None => tx.insert_placement(location_id, &relative_path, content.id)?.id,
            Some(p) if p.content_id == content.id => p.id,
            Some(mut p) => {
                let old_content = p.content_id;
                p.content_id = content.id;
                tx.update_placement(&p)?;
                if tx.placements_for_content(old_content)?.is_empty() {
                    if let Some(old) = tx.get_content(old_content)? {
                        let series: Vec<i64> = if old.hash.is_empty() {
                            Vec::new()
                        } else {
                            tx.associations_for_hash(&old.hash)?
                                .into_iter()
                                .map(|a| a.series_id)
                                .collect()
                        };
                        tx.delete_content(old.id)?;
                        orphan = Some((old, series));
                    }
                }
                p.id
            }
        };

        Ok((
            Registration {
                content_id: content.id,
                placement_id,
                hash: hash.clone(),
                rehashed: true,
                created_content,
            },
            orphan,
        ))
    })?;

    if let Some((old, series)) = orphan {
        info!(content_id = old.id, "Content at path changed, dropped old record");
        if !old.hash.is_empty() {
            ctx.enqueue(JobKind::DeleteExternalReference {
                hash: old.hash,
                size: old.file_size,
            });
        }
        enqueue_stats(ctx, &series.into_iter().collect());
    }

    info!(
        content_id = registration.content_id,
        hash = sanitize::short_hash(&registration.hash),
        created = registration.created_content,
        "Identified file"
    );
    ctx.enqueue(JobKind::ProcessFile {
        content_id: registration.content_id,
    });
    Ok(registration)
}

fn enqueue_stats(ctx: &PipelineContext, series: &BTreeSet<i64>) {
    for series_id in series {
        ctx.enqueue(JobKind::UpdateSeriesStats {
            series_id: *series_id,
        });
    }
}

/// Asks the metadata provider about a content record and stores what it
/// knows. Unknown content is not an error; it is looked up again on the
/// next reprocess.
pub fn process_content(ctx: &PipelineContext, content_id: i64) -> JobOutcome {
    match process_inner(ctx, content_id) {
        Ok(outcome) | Err(outcome) => outcome,
    }
}

fn process_inner(ctx: &PipelineContext, content_id: i64) -> Result<JobOutcome, JobOutcome> {
    let mut content = ctx
        .store
        .get_content(content_id)?
        .ok_or_else(|| JobOutcome::structural(format!("content {} not found", content_id)))?;
    if content.hash.is_empty() {
        return Err(JobOutcome::structural(format!("content {} has no hash", content_id)));
    }

    let Some(found) = ctx.metadata.lookup_by_hash(&content.hash, content.file_size)? else {
        debug!(content_id, "Not identified yet");
        return Ok(JobOutcome::success());
    };

    let mut series_ids: BTreeSet<i64> = found.series.iter().map(|s| s.id).collect();
    series_ids.extend(found.episodes.iter().map(|e| e.series_id));

    let hash = content.hash.clone();
    let duration_changed = found.duration_ms.is_some() && found.duration_ms != content.duration_ms;
    ctx.store.transaction(|tx| {
        for series in &found.series {
            catalog_repo::merge_series_name(tx.conn(), series.id, &series.name)?;
        }
        for episode in &found.episodes {
            catalog_repo::upsert_episode(tx.conn(), episode)?;
            catalog_repo::insert_xref(
                tx.conn(),
                &EpisodeAssociation {
                    hash: hash.clone(),
                    episode_id: episode.id,
                    series_id: episode.series_id,
                },
            )?;
        }
        if duration_changed {
            content.duration_ms = found.duration_ms;
            tx.update_content(&mut content)?;
        }
        Ok(())
    })?;

    info!(
        content_id,
        episodes = found.episodes.len(),
        "Stored catalog associations"
    );

    for series_id in &series_ids {
        ctx.enqueue(JobKind::UpdateSeriesStats {
            series_id: *series_id,
        });
    }
    for placement in ctx.store.placements_for_content(content_id)? {
        ctx.enqueue(JobKind::MoveFile {
            placement_id: placement.id,
        });
    }
    for series_id in &series_ids {
        ctx.enqueue(JobKind::DownloadImage {
            series_id: *series_id,
        });
    }
    Ok(JobOutcome::success())
}

/// Recomputes a series' aggregate counters from what is on disk.
pub fn update_series_stats(ctx: &PipelineContext, series_id: i64) -> JobOutcome {
    match stats_inner(ctx, series_id) {
        Ok(()) => JobOutcome::success(),
        Err(outcome) => outcome,
    }
}

fn stats_inner(ctx: &PipelineContext, series_id: i64) -> Result<(), JobOutcome> {
    let mut series = ctx
        .store
        .get_series(series_id)?
        .ok_or_else(|| JobOutcome::structural(format!("series {} not found", series_id)))?;
    let episodes = ctx.store.episodes_for_series(series_id)?;
    let today = Utc::now().date_naive();

    let mut with_files = 0u32;
    let mut missing = 0u32;
    let mut latest = None;
    for episode in &episodes {
        let mut has_file = false;
        for link in ctx.store.associations_for_episode(episode.id)? {
            if let Some(content) = ctx.store.content_by_hash(&link.hash)? {
                if !ctx.store.placements_for_content(content.id)?.is_empty() {
                    has_file = true;
                    break;
                }
            }
        }
        if has_file {
            with_files += 1;
            if episode.air_date > latest {
                latest = episode.air_date;
            }
        } else if episode.air_date.is_some_and(|d| d <= today) {
            missing += 1;
        }
    }

    series.episode_count = episodes.len() as u32;
    series.episodes_with_files = with_files;
    series.missing_episodes = missing;
    series.latest_local_air_date = latest;
    series.stats_updated_at = Some(Utc::now());
    ctx.store.save_series(&series)?;
    debug!(
        series_id,
        with_files, missing, "Updated series stats"
    );
    Ok(())
}
