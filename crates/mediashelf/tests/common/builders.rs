//! Builders for creating test data programmatically.
//!
//! These keep the property tests focused on behavior instead of record
//! plumbing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveDate;

use mediashelf::metadata::{Associations, MetadataProvider, ProviderError};
use mediashelf::model::{Episode, Series, StorageLocation};
use mediashelf::policy::{
    Destination, NamingPolicy, NamingPolicyFactory, PolicyContext, PolicyDecision,
};

/// Builder for `StorageLocation` records.
pub struct LocationBuilder {
    location: StorageLocation,
}

impl LocationBuilder {
    pub fn new(id: i64, root: &str) -> Self {
        Self {
            location: StorageLocation {
                id,
                name: format!("location-{}", id),
                root_path: PathBuf::from(root),
                cloud_id: None,
                is_drop_source: false,
                is_drop_destination: false,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.location.name = name.to_string();
        self
    }

    pub fn drop_source(mut self) -> Self {
        self.location.is_drop_source = true;
        self
    }

    pub fn drop_destination(mut self) -> Self {
        self.location.is_drop_destination = true;
        self
    }

    pub fn cloud(mut self, cloud_id: &str) -> Self {
        self.location.cloud_id = Some(cloud_id.to_string());
        self
    }

    pub fn build(self) -> StorageLocation {
        self.location
    }
}

/// Builder for the answer the catalog gives about one hash.
pub struct AssociationsBuilder {
    associations: Associations,
}

impl AssociationsBuilder {
    pub fn series(id: i64, name: &str) -> Self {
        Self {
            associations: Associations {
                series: vec![Series::new(id, name)],
                episodes: Vec::new(),
                duration_ms: None,
            },
        }
    }

    /// Adds an episode of the first series.
    pub fn episode(mut self, id: i64, number: u32, air_date: Option<NaiveDate>) -> Self {
        let series_id = self.associations.series.first().map(|s| s.id).unwrap_or(0);
        self.associations.episodes.push(Episode {
            id,
            series_id,
            number,
            title: format!("Episode {}", number),
            air_date,
        });
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.associations.duration_ms = Some(duration_ms);
        self
    }

    pub fn build(self) -> Associations {
        self.associations
    }
}

/// Metadata provider answering from a fixed table of hashes.
#[derive(Default)]
pub struct FakeMetadata {
    known: Mutex<HashMap<String, Associations>>,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identify(&self, hash: &str, associations: Associations) {
        self.known
            .lock()
            .unwrap()
            .insert(hash.to_string(), associations);
    }
}

impl MetadataProvider for FakeMetadata {
    fn lookup_by_hash(&self, hash: &str, _size: u64) -> Result<Option<Associations>, ProviderError> {
        Ok(self.known.lock().unwrap().get(hash).cloned())
    }
}

/// A naming policy that always gives the same answers.
#[derive(Clone)]
pub struct StaticPolicy {
    id: String,
    filename: Option<String>,
    destination: Option<Destination>,
}

impl StaticPolicy {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            filename: None,
            destination: None,
        }
    }

    pub fn filename(mut self, name: &str) -> Self {
        self.filename = Some(name.to_string());
        self
    }

    pub fn destination(mut self, location_id: i64, relative_dir: &str) -> Self {
        self.destination = Some(Destination {
            location_id,
            relative_dir: relative_dir.to_string(),
        });
        self
    }
}

impl NamingPolicyFactory for StaticPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn create(&self) -> Box<dyn NamingPolicy> {
        Box::new(self.clone())
    }
}

impl NamingPolicy for StaticPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_filename(&mut self, _ctx: &PolicyContext<'_>) -> PolicyDecision<String> {
        match &self.filename {
            Some(name) => PolicyDecision::Accept(name.clone()),
            None => PolicyDecision::Decline,
        }
    }

    fn get_destination(&mut self, _ctx: &PolicyContext<'_>) -> PolicyDecision<Destination> {
        match &self.destination {
            Some(dest) => PolicyDecision::Accept(dest.clone()),
            None => PolicyDecision::Decline,
        }
    }
}
