use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span, warn};

use crate::db::DatabaseError;
use crate::error::StorageError;
use crate::model::{ContentRecord, Episode, PlacementRecord, Series, StorageLocation};
use crate::pipeline::{JobOutcome, PipelineContext};
use crate::policy::{PolicyContext, PolicyDecision};
use crate::queue::{CancellationToken, JobKind};
use crate::sanitize;
use crate::storage::{ensure_directory, remove_empty_directories, same_path_ignore_case, FileSystem};

use super::cleanup::remove_placement;
use super::destination::{can_receive, default_target, Target};
use super::retry::{RetryError, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementFailure {
    /// The file is gone. The stale record has been removed.
    SourceNotFound,
    /// The target name is taken. Not an error; the file stays put.
    DestinationConflict,
    Busy(String),
    Filesystem(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase does not apply to this placement.
    Skipped,
    /// No policy and no default produced a target.
    Declined,
    /// The target is where the file already is.
    Unchanged,
    Applied(PathBuf),
    /// An identical file already sat at the destination; the source was
    /// deleted instead of moved.
    SourceRemoved,
    Failed(PlacementFailure),
}

impl PhaseOutcome {
    fn failure(&self) -> Option<&PlacementFailure> {
        match self {
            PhaseOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// Whether the next phase may run after this one.
    fn allows_next(&self) -> bool {
        !matches!(
            self,
            PhaseOutcome::SourceRemoved
                | PhaseOutcome::Failed(
                    PlacementFailure::SourceNotFound
                        | PlacementFailure::Busy(_)
                        | PlacementFailure::Filesystem(_)
                        | PlacementFailure::Cancelled
                )
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementReport {
    pub placement_id: i64,
    pub rename: PhaseOutcome,
    pub movement: PhaseOutcome,
    /// Series whose stats changed because content disappeared.
    pub touched_series: BTreeSet<i64>,
}

impl PlacementReport {
    fn new(placement_id: i64) -> Self {
        Self {
            placement_id,
            rename: PhaseOutcome::Skipped,
            movement: PhaseOutcome::Skipped,
            touched_series: BTreeSet::new(),
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        for phase in [&self.rename, &self.movement] {
            match phase.failure() {
                Some(PlacementFailure::SourceNotFound) => {
                    return JobOutcome::structural(format!(
                        "source of placement {} not found",
                        self.placement_id
                    ))
                }
                // The backoff already ran; the file waits for the next scan.
                Some(PlacementFailure::Busy(e)) | Some(PlacementFailure::Filesystem(e)) => {
                    return JobOutcome::deferred(e.clone())
                }
                Some(PlacementFailure::Cancelled) => return JobOutcome::retryable("cancelled"),
                Some(PlacementFailure::DestinationConflict) | None => {}
            }
        }

        let idle = |p: &PhaseOutcome| matches!(p, PhaseOutcome::Skipped | PhaseOutcome::Declined);
        if idle(&self.rename)
            && idle(&self.movement)
            && (self.rename == PhaseOutcome::Declined || self.movement == PhaseOutcome::Declined)
        {
            return JobOutcome::declined("no name or destination chosen");
        }
        JobOutcome::success()
    }
}

/// Maps an exhausted or fatal retry onto a phase failure.
fn failure_from(err: RetryError) -> PlacementFailure {
    match err {
        RetryError::Cancelled => PlacementFailure::Cancelled,
        RetryError::Failed(e) if e.is_not_found() => PlacementFailure::SourceNotFound,
        RetryError::Failed(StorageError::AlreadyExists(_)) => PlacementFailure::DestinationConflict,
        RetryError::Failed(e) if e.is_busy() => PlacementFailure::Busy(e.to_string()),
        RetryError::Failed(e) => PlacementFailure::Filesystem(e.to_string()),
    }
}

/// Renames and moves one placement's file.
pub struct PlacementEngine<'a> {
    ctx: &'a PipelineContext,
    token: &'a CancellationToken,
    retry: RetryPolicy,
}

/// Records the placement is evaluated against.
struct Subject {
    placement: PlacementRecord,
    location: StorageLocation,
    content: ContentRecord,
    series: Option<Series>,
    episodes: Vec<Episode>,
    locations: Vec<StorageLocation>,
}

impl Subject {
    fn policy_context(&self) -> PolicyContext<'_> {
        PolicyContext {
            placement: &self.placement,
            location: &self.location,
            content: &self.content,
            series: self.series.as_ref(),
            episodes: &self.episodes,
            locations: &self.locations,
        }
    }

    fn source_path(&self) -> PathBuf {
        self.location.full_path(&self.placement.relative_path)
    }
}

impl<'a> PlacementEngine<'a> {
    pub fn new(ctx: &'a PipelineContext, token: &'a CancellationToken) -> Self {
        Self {
            ctx,
            token,
            retry: ctx.retry_policy(),
        }
    }

    /// Runs the rename phase and then, for drop sources, the move phase.
    ///
    /// Missing records are a structural mismatch and come back as `Err`.
    pub fn evaluate_and_apply(&self, placement_id: i64) -> Result<PlacementReport, JobOutcome> {
        let mut report = PlacementReport::new(placement_id);
        let mut subject = self.load(placement_id)?;

        let _span = info_span!(
            "placement",
            placement_id,
            file = %sanitize::redact_path(&subject.source_path())
        )
        .entered();

        if !self.ctx.filesystems.is_online(&subject.location) {
            warn!(location = %subject.location.name, "Location offline, skipping placement");
            return Ok(report);
        }
        let fs = self.ctx.filesystems.for_location(&subject.location)?;

        if self.ctx.config.rename_enabled {
            report.rename = self.rename(fs.as_ref(), &mut subject, &mut report.touched_series)?;
        }

        if report.rename.allows_next() && self.ctx.config.move_enabled {
            if subject.location.is_drop_source {
                report.movement = self.relocate(fs.as_ref(), &mut subject, &mut report.touched_series)?;
            } else {
                debug!("Not a drop source, leaving file in place");
            }
        }

        for series_id in &report.touched_series {
            self.ctx.enqueue(JobKind::UpdateSeriesStats {
                series_id: *series_id,
            });
        }
        Ok(report)
    }

    fn load(&self, placement_id: i64) -> Result<Subject, JobOutcome> {
        let store = &self.ctx.store;
        let placement = store
            .get_placement(placement_id)?
            .ok_or_else(|| JobOutcome::structural(format!("placement {} not found", placement_id)))?;
        let location = store.get_location(placement.location_id)?.ok_or_else(|| {
            JobOutcome::structural(format!("location {} not found", placement.location_id))
        })?;
        let content = store.get_content(placement.content_id)?.ok_or_else(|| {
            JobOutcome::structural(format!("content {} not found", placement.content_id))
        })?;

        let associations = if content.hash.is_empty() {
            Vec::new()
        } else {
            store.associations_for_hash(&content.hash)?
        };
        let series = match associations.first() {
            Some(first) => store.get_series(first.series_id)?,
            None => None,
        };
        let mut episodes = Vec::new();
        for association in &associations {
            if let Some(episode) = store.get_episode(association.episode_id)? {
                episodes.push(episode);
            }
        }
        episodes.sort_by_key(|e| e.number);

        Ok(Subject {
            placement,
            location,
            content,
            series,
            episodes,
            locations: store.all_locations()?,
        })
    }

    /// Phase A.
    fn rename(
        &self,
        fs: &dyn FileSystem,
        subject: &mut Subject,
        touched: &mut BTreeSet<i64>,
    ) -> Result<PhaseOutcome, DatabaseError> {
        let source = subject.source_path();
        if let Err(err) = self.retry.run("resolve", self.ctx.sleeper.as_ref(), self.token, || {
            fs.resolve(&source)
        }) {
            return self.fail(subject, failure_from(err), touched);
        }

        let new_name = match self.ctx.policies.resolve_filename(&subject.policy_context()) {
            PolicyDecision::Accept(name) => name,
            PolicyDecision::Decline | PolicyDecision::Cancel => return Ok(PhaseOutcome::Declined),
        };
        if new_name.to_lowercase() == subject.placement.file_name().to_lowercase() {
            return Ok(PhaseOutcome::Unchanged);
        }

        if let Some(parent) = source.parent() {
            if fs.resolve(&parent.join(&new_name)).is_ok() {
                info!(name = %new_name, "Destination name exists, not renaming");
                return Ok(PhaseOutcome::Failed(PlacementFailure::DestinationConflict));
            }
        }

        let renamed = self.retry.run("rename", self.ctx.sleeper.as_ref(), self.token, || {
            fs.rename(&source, &new_name)
        });
        match renamed {
            Ok(new_path) => {
                let relative = match subject.placement.relative_dir() {
                    "" => new_name.clone(),
                    dir => format!("{}/{}", dir, new_name),
                };
                let location_id = subject.location.id;
                self.repoint(&mut subject.placement, location_id, relative, touched)?;
                info!(name = %new_name, "Renamed file");
                Ok(PhaseOutcome::Applied(new_path))
            }
            Err(err) => self.fail(subject, failure_from(err), touched),
        }
    }

    /// Phase B.
    fn relocate(
        &self,
        fs: &dyn FileSystem,
        subject: &mut Subject,
        touched: &mut BTreeSet<i64>,
    ) -> Result<PhaseOutcome, DatabaseError> {
        let Some(target) = self.choose_target(subject)? else {
            return Ok(PhaseOutcome::Declined);
        };

        let source = subject.source_path();
        let dest_dir = target.location.full_path(&target.relative_dir);
        let file_name = subject.placement.file_name().to_string();
        let dest_path = dest_dir.join(&file_name);

        if same_path_ignore_case(&dest_path, &source) {
            debug!("Resolved to move file onto itself, not moving");
            return Ok(PhaseOutcome::Unchanged);
        }

        if fs.resolve(&dest_path).is_ok_and(|e| e.is_file()) {
            info!("File already exists at destination, deleting source instead");
            return self.drop_duplicate(fs, subject, touched);
        }

        let sleeper = self.ctx.sleeper.as_ref();
        if let Err(err) = self.retry.run("create directory", sleeper, self.token, || {
            ensure_directory(fs, &target.location.root_path, &target.relative_dir)
        }) {
            return self.fail(subject, failure_from(err), touched);
        }

        let moved = self
            .retry
            .run("move", sleeper, self.token, || fs.move_to(&source, &dest_dir));
        let new_path = match moved {
            Ok(path) => path,
            Err(RetryError::Failed(StorageError::AlreadyExists(_))) => {
                return self.drop_duplicate(fs, subject, touched)
            }
            Err(err) => return self.fail(subject, failure_from(err), touched),
        };

        let relative = match target.relative_dir.as_str() {
            "" => file_name.clone(),
            dir => format!("{}/{}", dir.trim_end_matches('/'), file_name),
        };
        self.repoint(&mut subject.placement, target.location.id, relative, touched)?;
        info!(
            to = %target.location.name,
            dir = %target.relative_dir,
            "Moved file"
        );

        self.move_companions(fs, &source, &dest_dir);
        self.clean_drop_source(fs, &subject.location);
        Ok(PhaseOutcome::Applied(new_path))
    }

    fn choose_target(&self, subject: &Subject) -> Result<Option<Target>, DatabaseError> {
        match self.ctx.policies.resolve_destination(&subject.policy_context()) {
            PolicyDecision::Accept(dest) => {
                let location = subject
                    .locations
                    .iter()
                    .find(|l| l.id == dest.location_id)
                    .cloned();
                match location {
                    Some(location)
                        if can_receive(
                            self.ctx,
                            &location,
                            &subject.location,
                            subject.content.file_size,
                        ) =>
                    {
                        Ok(Some(Target {
                            location,
                            relative_dir: crate::model::normalize_relative(&dest.relative_dir)
                                .trim_matches('/')
                                .to_string(),
                        }))
                    }
                    Some(location) => {
                        warn!(location = %location.name, "Policy destination cannot take the file");
                        Ok(None)
                    }
                    None => Ok(None),
                }
            }
            PolicyDecision::Cancel => Ok(None),
            PolicyDecision::Decline => default_target(
                self.ctx,
                &subject.content,
                &subject.placement,
                &subject.location,
            ),
        }
    }

    /// Deletes the source because the destination already holds the file,
    /// then forgets the placement.
    fn drop_duplicate(
        &self,
        fs: &dyn FileSystem,
        subject: &Subject,
        touched: &mut BTreeSet<i64>,
    ) -> Result<PhaseOutcome, DatabaseError> {
        let source = subject.source_path();
        let deleted = self.retry.run("delete", self.ctx.sleeper.as_ref(), self.token, || {
            fs.delete(&source)
        });
        match deleted {
            Ok(()) | Err(RetryError::Failed(StorageError::NotFound(_))) => {
                remove_placement(self.ctx, subject.placement.id, touched)?;
                self.clean_drop_source(fs, &subject.location);
                Ok(PhaseOutcome::SourceRemoved)
            }
            Err(err) => Ok(PhaseOutcome::Failed(failure_from(err))),
        }
    }

    /// Records a failure. A vanished source takes its record with it.
    fn fail(
        &self,
        subject: &Subject,
        failure: PlacementFailure,
        touched: &mut BTreeSet<i64>,
    ) -> Result<PhaseOutcome, DatabaseError> {
        if failure == PlacementFailure::SourceNotFound {
            warn!("Source file not found, removing stale record");
            remove_placement(self.ctx, subject.placement.id, touched)?;
        }
        Ok(PhaseOutcome::Failed(failure))
    }

    /// Points `placement` at a new path. A different record still claiming
    /// that path is stale and removed first.
    fn repoint(
        &self,
        placement: &mut PlacementRecord,
        location_id: i64,
        relative_path: String,
        touched: &mut BTreeSet<i64>,
    ) -> Result<(), DatabaseError> {
        if let Some(existing) = self.ctx.store.placement_at(location_id, &relative_path)? {
            if existing.id != placement.id {
                remove_placement(self.ctx, existing.id, touched)?;
            }
        }
        placement.location_id = location_id;
        placement.relative_path = relative_path;
        self.ctx.store.save_placement(placement)
    }

    /// Moves subtitles sharing the video's stem next to it. Failures are
    /// logged and left for the next run.
    fn move_companions(&self, fs: &dyn FileSystem, source: &Path, dest_dir: &Path) {
        let (Some(source_dir), Some(stem)) = (
            source.parent(),
            source.file_stem().and_then(|s| s.to_str()),
        ) else {
            return;
        };
        let entries = match fs.list(source_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {} for subtitles: {}", source_dir.display(), e);
                return;
            }
        };

        let prefix = format!("{}.", stem.to_lowercase());
        let sleeper = self.ctx.sleeper.as_ref();
        for entry in entries.into_iter().filter(|e| e.is_file()) {
            let Some(name) = entry.path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_subtitle = entry
                .path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| self.ctx.config.is_subtitle_extension(ext));
            if !is_subtitle || !name.to_lowercase().starts_with(&prefix) {
                continue;
            }

            let result = if fs.resolve(&dest_dir.join(name)).is_ok() {
                self.retry
                    .run("delete subtitle", sleeper, self.token, || fs.delete(&entry.path))
                    .map(|_| ())
            } else {
                self.retry
                    .run("move subtitle", sleeper, self.token, || fs.move_to(&entry.path, dest_dir))
                    .map(|_| ())
            };
            match result {
                Ok(()) => debug!(subtitle = %name, "Moved subtitle companion"),
                Err(e) => warn!(subtitle = %name, "Subtitle companion left behind: {:?}", e),
            }
        }
    }

    fn clean_drop_source(&self, fs: &dyn FileSystem, location: &StorageLocation) {
        match remove_empty_directories(fs, &location.root_path) {
            Ok(0) => {}
            Ok(n) => debug!(location = %location.name, "Removed {} empty directories", n),
            Err(e) => warn!(location = %location.name, "Empty directory cleanup failed: {}", e),
        }
    }
}

/// Convenience over [`PlacementEngine`].
pub fn evaluate_and_apply(
    ctx: &PipelineContext,
    placement_id: i64,
    token: &CancellationToken,
) -> Result<PlacementReport, JobOutcome> {
    PlacementEngine::new(ctx, token).evaluate_and_apply(placement_id)
}
