use tracing::{debug, info, info_span, warn};

use crate::identity;
use crate::placement::PlacementEngine;
use crate::queue::{CancellationToken, Job, JobKind};
use crate::reconcile;
use crate::scanner;

use super::context::PipelineContext;
use super::outcome::{JobOutcome, Outcome};

/// Executes claimed jobs. One per worker; holds nothing but the context.
#[derive(Clone)]
pub struct Pipeline {
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Runs one job to an outcome. Never panics on bad input; every
    /// failure is mapped onto an [`Outcome`] for the worker to act on.
    pub fn run(&self, job: &Job, token: &CancellationToken) -> JobOutcome {
        let _job_span = info_span!("job",
            job_id = %job.id,
            kind = job.kind.name(),
            attempt = job.attempts + 1,
        )
        .entered();

        if token.is_cancelled() {
            return JobOutcome::retryable("cancelled before start");
        }

        let outcome = self.dispatch(&job.kind, token);
        match outcome.kind {
            Outcome::Success => debug!("Job succeeded"),
            Outcome::PolicyDeclined | Outcome::StructuralMismatch => {
                info!(outcome = outcome.kind.as_str(), detail = %outcome.detail, "Job finished without changes")
            }
            Outcome::Deferred => {
                warn!(detail = %outcome.detail, "Job deferred to the next scan")
            }
            Outcome::Retryable | Outcome::Fatal => {
                warn!(outcome = outcome.kind.as_str(), detail = %outcome.detail, "Job failed")
            }
        }
        outcome
    }

    fn dispatch(&self, kind: &JobKind, token: &CancellationToken) -> JobOutcome {
        let ctx = &self.ctx;
        match kind {
            JobKind::HashFile {
                location_id,
                relative_path,
                force,
            } => {
                let _step = info_span!("hash_file").entered();
                match identity::register(ctx, *location_id, relative_path, *force) {
                    Ok(_) => JobOutcome::success(),
                    Err(outcome) => outcome,
                }
            }
            JobKind::ProcessFile { content_id } => {
                let _step = info_span!("process_file").entered();
                identity::process_content(ctx, *content_id)
            }
            JobKind::MoveFile { placement_id } => {
                let _step = info_span!("move_file").entered();
                match PlacementEngine::new(ctx, token).evaluate_and_apply(*placement_id) {
                    Ok(report) => report.outcome(),
                    Err(outcome) => outcome,
                }
            }
            JobKind::UpdateSeriesStats { series_id } => {
                let _step = info_span!("update_series_stats").entered();
                identity::update_series_stats(ctx, *series_id)
            }
            JobKind::DownloadImage { series_id } => {
                outcome_of(ctx.catalog.download_image(*series_id))
            }
            JobKind::SyncExternalCatalog => outcome_of(ctx.catalog.sync()),
            JobKind::DeleteExternalReference { hash, size } => {
                outcome_of(ctx.catalog.delete_reference(hash, *size))
            }
            JobKind::RecalculateGroupFilter => outcome_of(ctx.catalog.recalculate_group_filter()),
            JobKind::ScanLocation { location_id } => {
                let _step = info_span!("scan_location").entered();
                match ctx.store.get_location(*location_id) {
                    Ok(Some(location)) => {
                        outcome_of(scanner::scan_location(ctx, &location, token))
                    }
                    Ok(None) => {
                        JobOutcome::structural(format!("location {} not found", location_id))
                    }
                    Err(e) => e.into(),
                }
            }
            JobKind::ScanDropSources => {
                let _step = info_span!("scan_drop_sources").entered();
                outcome_of(scanner::scan_all_drop_sources(ctx, token))
            }
            JobKind::ScanNewFiles => {
                let _step = info_span!("scan_new_files").entered();
                outcome_of(scanner::scan_new_files(ctx, token))
            }
            JobKind::Reconcile => {
                let _step = info_span!("reconcile").entered();
                match reconcile::reconcile(ctx, token) {
                    Ok(report) if report.cancelled => JobOutcome::retryable("reconcile cancelled"),
                    Ok(_) => JobOutcome::success(),
                    Err(e) => e.into(),
                }
            }
        }
    }
}

fn outcome_of<T, E: Into<JobOutcome>>(result: Result<T, E>) -> JobOutcome {
    match result {
        Ok(_) => JobOutcome::success(),
        Err(e) => e.into(),
    }
}
