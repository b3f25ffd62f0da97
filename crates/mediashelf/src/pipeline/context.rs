use std::sync::Arc;

use crate::config::{Config, LocationConfig, PoliciesConfig};
use crate::db::{Database, DatabaseError};
use crate::error::{ConfigError, Result};
use crate::metadata::{ExternalCatalog, LoggingCatalog, MetadataProvider, NullMetadataProvider};
use crate::model::StorageLocation;
use crate::placement::{RetryPolicy, Sleeper, TokenSleeper};
use crate::policy::PolicyRegistry;
use crate::queue::{CommandQueue, JobKind};
use crate::storage::FileSystemRegistry;
use crate::store::RecordStore;

use super::config::PipelineConfig;

/// Everything a job handler needs. Cheap to clone; every worker holds one.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<RecordStore>,
    pub queue: Arc<CommandQueue>,
    pub filesystems: Arc<FileSystemRegistry>,
    pub policies: Arc<PolicyRegistry>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub catalog: Arc<dyn ExternalCatalog>,
    pub config: Arc<PipelineConfig>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl PipelineContext {
    pub fn builder(db: Database) -> PipelineContextBuilder {
        PipelineContextBuilder::new(db)
    }

    /// Opens the configured database and registers the configured locations.
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "No database_path configured and no home directory found".to_string(),
        })?;
        let db = Database::open(&path)?;

        let ctx = Self::builder(db)
            .config(PipelineConfig::from_config(config)?)
            .policies(PolicyRegistry::with_builtin(&config.policies)?)
            .max_attempts(config.queue.max_attempts)
            .build()?;
        ctx.sync_locations(&config.locations)?;
        Ok(ctx)
    }

    /// Upserts configured locations. Locations only present in the store
    /// are left alone; `delete_location` removes them.
    pub fn sync_locations(&self, locations: &[LocationConfig]) -> std::result::Result<usize, DatabaseError> {
        let locations: Vec<StorageLocation> = locations.iter().map(LocationConfig::to_location).collect();
        self.store.transaction(|tx| {
            for location in &locations {
                tx.save_location(location)?;
            }
            Ok(locations.len())
        })
    }

    /// Best-effort enqueue. Failures are logged, never propagated.
    pub fn enqueue(&self, kind: JobKind) -> bool {
        match self.queue.submit(kind.clone()) {
            Ok(result) => result.is_queued(),
            Err(e) => {
                log::warn!("Failed to enqueue {}: {}", kind, e);
                false
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(&self.config.retry_delays_ms)
    }
}

pub struct PipelineContextBuilder {
    db: Database,
    config: PipelineConfig,
    policies: Option<PolicyRegistry>,
    filesystems: Option<FileSystemRegistry>,
    metadata: Arc<dyn MetadataProvider>,
    catalog: Arc<dyn ExternalCatalog>,
    sleeper: Arc<dyn Sleeper>,
    max_attempts: u32,
}

impl PipelineContextBuilder {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            config: PipelineConfig::default(),
            policies: None,
            filesystems: None,
            metadata: Arc::new(NullMetadataProvider),
            catalog: Arc::new(LoggingCatalog),
            sleeper: Arc::new(TokenSleeper),
            max_attempts: 3,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn filesystems(mut self, filesystems: FileSystemRegistry) -> Self {
        self.filesystems = Some(filesystems);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ExternalCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn build(self) -> Result<PipelineContext> {
        let policies = match self.policies {
            Some(policies) => policies,
            None => PolicyRegistry::with_builtin(&PoliciesConfig::default())?,
        };
        let filesystems = self.filesystems.unwrap_or_else(FileSystemRegistry::local_only);

        let store = RecordStore::open(self.db.clone())?;
        let queue = CommandQueue::open(self.db, self.max_attempts)?;

        Ok(PipelineContext {
            store: Arc::new(store),
            queue: Arc::new(queue),
            filesystems: Arc::new(filesystems),
            policies: Arc::new(policies),
            metadata: self.metadata,
            catalog: self.catalog,
            config: Arc::new(self.config),
            sleeper: self.sleeper,
        })
    }
}
