//! Media collection ingestion: content identity by hash, deduplication,
//! and rule-driven placement of files across storage locations.

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod placement;
pub mod policy;
pub mod queue;
pub mod reconcile;
pub mod sanitize;
pub mod scanner;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod worker;

pub use config::{load_config, Config};
pub use error::{
    ConfigError, MediashelfError, QueueError, Result, StorageError, WorkerError,
};
pub use identity::Registration;
pub use metadata::{Associations, ExternalCatalog, MetadataProvider, ProviderError};
pub use model::{ContentRecord, Episode, EpisodeAssociation, PlacementRecord, Series, StorageLocation};
pub use pipeline::{JobOutcome, Outcome, Pipeline, PipelineConfig, PipelineContext};
pub use placement::{PlacementReport, PhaseOutcome};
pub use queue::{CancellationToken, CommandQueue, EnqueueResult, Job, JobKind, Priority};
pub use reconcile::ReconcileReport;
pub use scanner::ScanCounts;
pub use scheduler::Scheduler;
pub use worker::{JobReport, WorkerPool};
