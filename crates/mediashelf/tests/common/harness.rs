//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct wires a complete pipeline over:
//! - an in-memory SQLite database
//! - a `MemoryFileSystem` serving every local location
//! - a `RecordingSleeper`, so retries finish instantly and can be inspected
//! - a `FakeMetadata` provider the test fills with catalog answers
//!
//! Two locations are registered by default: a drop source at `/drop` and
//! a drop destination at `/library`.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use mediashelf::config::PoliciesConfig;
use mediashelf::db::Database;
use mediashelf::identity::{self, Registration};
use mediashelf::model::StorageLocation;
use mediashelf::pipeline::{Pipeline, PipelineConfig, PipelineContext};
use mediashelf::placement::{self, PlacementReport, RecordingSleeper};
use mediashelf::policy::{NamingPolicyFactory, PolicyRegistry};
use mediashelf::queue::{CancellationToken, JobKind};
use mediashelf::storage::{FileSystemRegistry, MemoryFileSystem};
use mediashelf::{JobOutcome, Outcome};

use super::builders::{FakeMetadata, LocationBuilder};

pub const DROP_ID: i64 = 1;
pub const LIBRARY_ID: i64 = 2;

/// Upper bound on jobs run by [`TestHarness::drain`].
const DRAIN_LIMIT: usize = 500;

pub struct TestHarness {
    pub ctx: PipelineContext,
    pub fs: Arc<MemoryFileSystem>,
    pub sleeper: Arc<RecordingSleeper>,
    pub metadata: Arc<FakeMetadata>,
    pub token: CancellationToken,
}

impl TestHarness {
    /// Harness with the built-in policies only.
    pub fn new() -> Self {
        Self::with_policies(Vec::new())
    }

    /// Harness with extra naming policies registered next to the built-ins.
    pub fn with_policies(policies: Vec<Arc<dyn NamingPolicyFactory>>) -> Self {
        Self::build(policies, PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self::build(Vec::new(), config)
    }

    fn build(policies: Vec<Arc<dyn NamingPolicyFactory>>, config: PipelineConfig) -> Self {
        let fs = Arc::new(MemoryFileSystem::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let metadata = Arc::new(FakeMetadata::new());

        let mut registry =
            PolicyRegistry::with_builtin(&PoliciesConfig::default()).expect("builtin policies");
        for policy in policies {
            registry.register(policy);
        }

        let ctx = PipelineContext::builder(Database::open_in_memory().expect("in-memory db"))
            .config(config)
            .policies(registry)
            .filesystems(FileSystemRegistry::new(fs.clone()))
            .metadata(metadata.clone())
            .sleeper(sleeper.clone())
            .build()
            .expect("pipeline context");

        let harness = Self {
            ctx,
            fs,
            sleeper,
            metadata,
            token: CancellationToken::new(),
        };
        harness.add_location(
            LocationBuilder::new(DROP_ID, "/drop")
                .name("Drop")
                .drop_source()
                .build(),
        );
        harness.add_location(
            LocationBuilder::new(LIBRARY_ID, "/library")
                .name("Library")
                .drop_destination()
                .build(),
        );
        harness
    }

    /// Stores the location and creates its root directory.
    pub fn add_location(&self, location: StorageLocation) {
        self.fs.add_dir(&location.root_path);
        self.ctx
            .store
            .save_location(&location)
            .expect("save location");
    }

    pub fn location(&self, id: i64) -> StorageLocation {
        self.ctx
            .store
            .get_location(id)
            .expect("read location")
            .expect("location exists")
    }

    /// Writes a file below a location's root and returns its full path.
    pub fn add_file(&self, location_id: i64, relative_path: &str, data: &[u8]) -> PathBuf {
        let path = self.location(location_id).full_path(relative_path);
        self.fs.add_file(&path, data);
        path
    }

    /// Writes and registers a file.
    pub fn add_registered(&self, location_id: i64, relative_path: &str, data: &[u8]) -> Registration {
        self.add_file(location_id, relative_path, data);
        self.register(location_id, relative_path)
    }

    pub fn register(&self, location_id: i64, relative_path: &str) -> Registration {
        identity::register(&self.ctx, location_id, relative_path, false)
            .unwrap_or_else(|outcome| panic!("register {} failed: {:?}", relative_path, outcome))
    }

    pub fn evaluate(&self, placement_id: i64) -> PlacementReport {
        placement::evaluate_and_apply(&self.ctx, placement_id, &self.token)
            .unwrap_or_else(|outcome| panic!("placement {} failed: {:?}", placement_id, outcome))
    }

    pub fn pending_kinds(&self) -> Vec<JobKind> {
        self.ctx
            .queue
            .pending_jobs()
            .expect("pending jobs")
            .into_iter()
            .map(|j| j.kind)
            .collect()
    }

    /// Empties the queue without running anything.
    pub fn clear_queue(&self) {
        for job in self.ctx.queue.pending_jobs().expect("pending jobs") {
            self.ctx.queue.complete(&job).expect("complete job");
        }
    }

    /// Runs queued jobs until the queue is empty. Returns each job's kind
    /// with its outcome, in execution order.
    pub fn drain(&self) -> Vec<(JobKind, JobOutcome)> {
        let pipeline = Pipeline::new(self.ctx.clone());
        let mut ran = Vec::new();
        while let Some(job) = self.ctx.queue.claim().expect("claim job") {
            let outcome = pipeline.run(&job, &self.token);
            match outcome.kind {
                Outcome::Retryable => {
                    self.ctx
                        .queue
                        .fail(&job, &outcome.detail)
                        .expect("fail job");
                }
                _ => self.ctx.queue.complete(&job).expect("complete job"),
            }
            ran.push((job.kind.clone(), outcome));
            assert!(ran.len() < DRAIN_LIMIT, "queue did not drain");
        }
        ran
    }
}
