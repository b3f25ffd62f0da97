//! Seams to the external catalog.
//!
//! The pipeline never talks to a catalog service directly. It asks a
//! [`MetadataProvider`] what a hash is, and hands bookkeeping to an
//! [`ExternalCatalog`]. Both default to implementations that know nothing
//! and succeed.

use thiserror::Error;

use crate::model::{Episode, Series};

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transient failure; the job is retried.
    #[error("Metadata provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered, but not with something usable.
    #[error("Metadata provider rejected request: {0}")]
    Rejected(String),
}

/// What the catalog knows about one piece of content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Associations {
    pub series: Vec<Series>,
    pub episodes: Vec<Episode>,
    pub duration_ms: Option<u64>,
}

pub trait MetadataProvider: Send + Sync {
    /// `Ok(None)` means the content is not identified yet.
    fn lookup_by_hash(&self, hash: &str, size: u64) -> Result<Option<Associations>, ProviderError>;
}

#[derive(Debug, Default)]
pub struct NullMetadataProvider;

impl MetadataProvider for NullMetadataProvider {
    fn lookup_by_hash(&self, _hash: &str, _size: u64) -> Result<Option<Associations>, ProviderError> {
        Ok(None)
    }
}

pub trait ExternalCatalog: Send + Sync {
    fn sync(&self) -> Result<(), ProviderError>;

    /// Drops the catalog's reference to content that no longer exists locally.
    fn delete_reference(&self, hash: &str, size: u64) -> Result<(), ProviderError>;

    fn download_image(&self, series_id: i64) -> Result<(), ProviderError>;

    fn recalculate_group_filter(&self) -> Result<(), ProviderError>;
}

/// Logs every request and reports success.
#[derive(Debug, Default)]
pub struct LoggingCatalog;

impl ExternalCatalog for LoggingCatalog {
    fn sync(&self) -> Result<(), ProviderError> {
        log::info!("External catalog sync requested");
        Ok(())
    }

    fn delete_reference(&self, hash: &str, size: u64) -> Result<(), ProviderError> {
        log::info!("External reference removal requested for {} ({} bytes)", hash, size);
        Ok(())
    }

    fn download_image(&self, series_id: i64) -> Result<(), ProviderError> {
        log::debug!("Image download requested for series {}", series_id);
        Ok(())
    }

    fn recalculate_group_filter(&self) -> Result<(), ProviderError> {
        log::debug!("Group filter recalculation requested");
        Ok(())
    }
}
