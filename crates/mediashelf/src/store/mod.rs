//! Cached record store over the SQLite database.
//!
//! Locations, contents and placements are mirrored in memory behind a
//! `RwLock` so hot lookups never touch SQLite. Writes go through
//! [`RecordStore::transaction`]: the closure runs against a SQLite
//! transaction, and the recorded changes are applied to the cache only
//! after a successful commit. Catalog rows and scheduled tasks are read
//! straight from the database.

mod cache;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::Connection;

use crate::db::{
    catalog_repo, content_repo, location_repo, placement_repo, task_repo, Database, DatabaseError,
};
use crate::model::{
    ContentRecord, Episode, EpisodeAssociation, PlacementRecord, ScheduledTask, Series,
    StorageLocation,
};
use cache::{Cache, Change};

pub struct RecordStore {
    db: Database,
    cache: RwLock<Cache>,
}

impl RecordStore {
    /// Loads every cached table from `db`.
    pub fn open(db: Database) -> Result<Self, DatabaseError> {
        let cache = db.with_conn(|conn| {
            Ok(Cache::load(
                location_repo::list(conn)?,
                content_repo::list(conn)?,
                placement_repo::list(conn)?,
            ))
        })?;
        log::debug!(
            "Record store loaded: {} locations, {} contents, {} placements",
            cache.locations.len(),
            cache.contents.len(),
            cache.placements.len()
        );
        Ok(Self {
            db,
            cache: RwLock::new(cache),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Cache>, DatabaseError> {
        self.cache.read().map_err(|_| DatabaseError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Cache>, DatabaseError> {
        self.cache.write().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Runs `f` in one SQLite transaction. On commit, the changes it
    /// made are applied to the cache under the write lock, while the
    /// connection is still held so the cache sees commits in order.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut StoreTx<'_>) -> Result<T, DatabaseError>,
    {
        self.db.with_transaction_then(
            |conn| {
                let mut tx = StoreTx {
                    conn: &**conn,
                    changes: Vec::new(),
                };
                let value = f(&mut tx)?;
                Ok((value, tx.changes))
            },
            |(value, changes)| {
                let mut cache = self.write()?;
                for change in changes {
                    cache.apply(change);
                }
                Ok(value)
            },
        )
    }

    // -- locations ---------------------------------------------------------

    pub fn get_location(&self, id: i64) -> Result<Option<StorageLocation>, DatabaseError> {
        Ok(self.read()?.locations.get(&id).cloned())
    }

    pub fn all_locations(&self) -> Result<Vec<StorageLocation>, DatabaseError> {
        let mut all: Vec<_> = self.read()?.locations.values().cloned().collect();
        all.sort_by_key(|l| l.id);
        Ok(all)
    }

    pub fn save_location(&self, location: &StorageLocation) -> Result<(), DatabaseError> {
        self.transaction(|tx| tx.save_location(location))
    }

    // -- contents ----------------------------------------------------------

    pub fn get_content(&self, id: i64) -> Result<Option<ContentRecord>, DatabaseError> {
        Ok(self.read()?.contents.get(&id).cloned())
    }

    pub fn all_contents(&self) -> Result<Vec<ContentRecord>, DatabaseError> {
        let mut all: Vec<_> = self.read()?.contents.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    /// The oldest record carrying `hash`. Empty hashes never match.
    pub fn content_by_hash(&self, hash: &str) -> Result<Option<ContentRecord>, DatabaseError> {
        if hash.is_empty() {
            return Ok(None);
        }
        let cache = self.read()?;
        Ok(cache
            .contents_by_hash
            .get(hash)
            .and_then(|ids| ids.iter().next())
            .and_then(|id| cache.contents.get(id))
            .cloned())
    }

    pub fn save_content(&self, content: &mut ContentRecord) -> Result<(), DatabaseError> {
        self.transaction(|tx| tx.update_content(content))
    }

    // -- placements --------------------------------------------------------

    pub fn get_placement(&self, id: i64) -> Result<Option<PlacementRecord>, DatabaseError> {
        Ok(self.read()?.placements.get(&id).cloned())
    }

    pub fn all_placements(&self) -> Result<Vec<PlacementRecord>, DatabaseError> {
        let mut all: Vec<_> = self.read()?.placements.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    pub fn placement_at(
        &self,
        location_id: i64,
        relative_path: &str,
    ) -> Result<Option<PlacementRecord>, DatabaseError> {
        let cache = self.read()?;
        Ok(cache
            .placements_by_path
            .get(&(location_id, relative_path.to_string()))
            .and_then(|id| cache.placements.get(id))
            .cloned())
    }

    pub fn placements_for_content(
        &self,
        content_id: i64,
    ) -> Result<Vec<PlacementRecord>, DatabaseError> {
        let cache = self.read()?;
        Ok(cache
            .placements_by_content
            .get(&content_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| cache.placements.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn placements_for_location(
        &self,
        location_id: i64,
    ) -> Result<Vec<PlacementRecord>, DatabaseError> {
        let mut found: Vec<_> = self
            .read()?
            .placements
            .values()
            .filter(|p| p.location_id == location_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.id);
        Ok(found)
    }

    pub fn save_placement(&self, placement: &PlacementRecord) -> Result<(), DatabaseError> {
        self.transaction(|tx| tx.update_placement(placement))
    }

    // -- catalog -----------------------------------------------------------

    pub fn get_series(&self, id: i64) -> Result<Option<Series>, DatabaseError> {
        self.db.with_conn(|conn| catalog_repo::find_series(conn, id))
    }

    pub fn save_series(&self, series: &Series) -> Result<(), DatabaseError> {
        self.db.with_conn(|conn| catalog_repo::upsert_series(conn, series))
    }

    pub fn get_episode(&self, id: i64) -> Result<Option<Episode>, DatabaseError> {
        self.db.with_conn(|conn| catalog_repo::find_episode(conn, id))
    }

    pub fn episodes_for_series(&self, series_id: i64) -> Result<Vec<Episode>, DatabaseError> {
        self.db
            .with_conn(|conn| catalog_repo::episodes_for_series(conn, series_id))
    }

    pub fn associations_for_hash(
        &self,
        hash: &str,
    ) -> Result<Vec<EpisodeAssociation>, DatabaseError> {
        self.db.with_conn(|conn| catalog_repo::xrefs_for_hash(conn, hash))
    }

    pub fn associations_for_episode(
        &self,
        episode_id: i64,
    ) -> Result<Vec<EpisodeAssociation>, DatabaseError> {
        self.db
            .with_conn(|conn| catalog_repo::xrefs_for_episode(conn, episode_id))
    }

    pub fn all_associations(&self) -> Result<Vec<EpisodeAssociation>, DatabaseError> {
        self.db.with_conn(catalog_repo::list_xrefs)
    }

    pub fn delete_association(&self, hash: &str, episode_id: i64) -> Result<bool, DatabaseError> {
        self.db
            .with_conn(|conn| catalog_repo::delete_xref(conn, hash, episode_id))
    }

    // -- scheduled tasks ---------------------------------------------------

    pub fn get_task(&self, name: &str) -> Result<Option<ScheduledTask>, DatabaseError> {
        self.db.with_conn(|conn| task_repo::find(conn, name))
    }

    pub fn record_task_run(
        &self,
        name: &str,
        at: chrono::DateTime<chrono::Utc>,
        min_interval_secs: i64,
    ) -> Result<(), DatabaseError> {
        self.db
            .with_conn(|conn| task_repo::record_run(conn, name, at, min_interval_secs))
    }
}

/// Write handle passed to [`RecordStore::transaction`].
///
/// Reads made through it see the transaction's own uncommitted writes.
pub struct StoreTx<'a> {
    conn: &'a Connection,
    changes: Vec<Change>,
}

impl StoreTx<'_> {
    /// Raw connection, for catalog writes that bypass the cache.
    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn save_location(&mut self, location: &StorageLocation) -> Result<(), DatabaseError> {
        location_repo::upsert(self.conn, location)?;
        self.changes.push(Change::Location(location.clone()));
        Ok(())
    }

    pub fn delete_location(&mut self, id: i64) -> Result<bool, DatabaseError> {
        let deleted = location_repo::delete(self.conn, id)?;
        if deleted {
            self.changes.push(Change::LocationRemoved(id));
        }
        Ok(deleted)
    }

    pub fn get_content(&self, id: i64) -> Result<Option<ContentRecord>, DatabaseError> {
        content_repo::find_by_id(self.conn, id)
    }

    pub fn content_by_hash(&self, hash: &str) -> Result<Option<ContentRecord>, DatabaseError> {
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(content_repo::find_by_hash(self.conn, hash)?.into_iter().next())
    }

    pub fn insert_content(
        &mut self,
        hash: &str,
        file_size: u64,
    ) -> Result<ContentRecord, DatabaseError> {
        let content = content_repo::insert(self.conn, hash, file_size)?;
        self.changes.push(Change::Content(content.clone()));
        Ok(content)
    }

    /// Fails with [`DatabaseError::RowMissing`] when the row was deleted
    /// since `content` was read.
    pub fn update_content(&mut self, content: &mut ContentRecord) -> Result<(), DatabaseError> {
        if !content_repo::update(self.conn, content)? {
            return Err(DatabaseError::RowMissing {
                table: "contents",
                id: content.id,
            });
        }
        self.changes.push(Change::Content(content.clone()));
        Ok(())
    }

    /// Deletes a content row. Its placements must already be gone.
    pub fn delete_content(&mut self, id: i64) -> Result<bool, DatabaseError> {
        let deleted = content_repo::delete(self.conn, id)?;
        if deleted {
            self.changes.push(Change::ContentRemoved(id));
        }
        Ok(deleted)
    }

    pub fn get_placement(&self, id: i64) -> Result<Option<PlacementRecord>, DatabaseError> {
        placement_repo::find_by_id(self.conn, id)
    }

    pub fn placement_at(
        &self,
        location_id: i64,
        relative_path: &str,
    ) -> Result<Option<PlacementRecord>, DatabaseError> {
        placement_repo::find_by_path(self.conn, location_id, relative_path)
    }

    pub fn placements_for_content(
        &self,
        content_id: i64,
    ) -> Result<Vec<PlacementRecord>, DatabaseError> {
        placement_repo::find_by_content(self.conn, content_id)
    }

    pub fn insert_placement(
        &mut self,
        location_id: i64,
        relative_path: &str,
        content_id: i64,
    ) -> Result<PlacementRecord, DatabaseError> {
        let placement = placement_repo::insert(self.conn, location_id, relative_path, content_id)?;
        self.changes.push(Change::Placement(placement.clone()));
        Ok(placement)
    }

    pub fn update_placement(&mut self, placement: &PlacementRecord) -> Result<(), DatabaseError> {
        if !placement_repo::update(self.conn, placement)? {
            return Err(DatabaseError::RowMissing {
                table: "placements",
                id: placement.id,
            });
        }
        self.changes.push(Change::Placement(placement.clone()));
        Ok(())
    }

    pub fn delete_placement(&mut self, id: i64) -> Result<bool, DatabaseError> {
        let deleted = placement_repo::delete(self.conn, id)?;
        if deleted {
            self.changes.push(Change::PlacementRemoved(id));
        }
        Ok(deleted)
    }

    pub fn associations_for_hash(
        &self,
        hash: &str,
    ) -> Result<Vec<EpisodeAssociation>, DatabaseError> {
        catalog_repo::xrefs_for_hash(self.conn, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn store() -> RecordStore {
        RecordStore::open(Database::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_transaction_updates_cache() {
        let store = store();
        let (content, placement) = store
            .transaction(|tx| {
                let c = tx.insert_content("abc", 100)?;
                let p = tx.insert_placement(1, "show/ep1.mkv", c.id)?;
                Ok((c, p))
            })
            .unwrap();

        assert_eq!(store.content_by_hash("abc").unwrap().unwrap().id, content.id);
        assert_eq!(
            store.placement_at(1, "show/ep1.mkv").unwrap().unwrap().id,
            placement.id
        );
        assert_eq!(store.placements_for_content(content.id).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_transaction_leaves_cache_untouched() {
        let store = store();
        let result: Result<(), DatabaseError> = store.transaction(|tx| {
            let c = tx.insert_content("abc", 100)?;
            tx.insert_placement(1, "a.mkv", c.id)?;
            // Duplicate path violates the unique index.
            tx.insert_placement(1, "a.mkv", c.id)?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(store.all_contents().unwrap().is_empty());
        assert!(store.all_placements().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_loads_cache() {
        let db = Database::open_in_memory().unwrap();
        {
            let store = RecordStore::open(db.clone()).unwrap();
            store
                .save_location(&StorageLocation {
                    id: 3,
                    name: "Library".into(),
                    root_path: PathBuf::from("/lib"),
                    cloud_id: None,
                    is_drop_source: false,
                    is_drop_destination: true,
                })
                .unwrap();
            store
                .transaction(|tx| {
                    let c = tx.insert_content("h", 1)?;
                    tx.insert_placement(3, "x.mkv", c.id)?;
                    Ok(())
                })
                .unwrap();
        }
        let reopened = RecordStore::open(db).unwrap();
        assert_eq!(reopened.all_locations().unwrap().len(), 1);
        assert_eq!(reopened.placements_for_location(3).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_hash_never_matches() {
        let store = store();
        store.transaction(|tx| tx.insert_content("", 0)).unwrap();
        assert!(store.content_by_hash("").unwrap().is_none());
    }

    #[test]
    fn test_saving_a_deleted_placement_does_not_resurrect_it() {
        let store = store();
        let stale = store
            .transaction(|tx| {
                let c = tx.insert_content("abc", 100)?;
                tx.insert_placement(1, "show/ep1.mkv", c.id)
            })
            .unwrap();
        store
            .transaction(|tx| tx.delete_placement(stale.id))
            .unwrap();

        let mut moved = stale.clone();
        moved.relative_path = "Show/ep1.mkv".into();
        let err = store.save_placement(&moved).unwrap_err();

        assert!(matches!(
            err,
            DatabaseError::RowMissing {
                table: "placements",
                ..
            }
        ));
        assert!(store.get_placement(stale.id).unwrap().is_none());
        assert!(store.placement_at(1, "Show/ep1.mkv").unwrap().is_none());
        let rows = store
            .database()
            .with_conn(|conn| placement_repo::find_by_id(conn, stale.id))
            .unwrap();
        assert!(rows.is_none());
    }

    #[test]
    fn test_saving_a_deleted_content_fails() {
        let store = store();
        let mut content = store.transaction(|tx| tx.insert_content("abc", 1)).unwrap();
        store.transaction(|tx| tx.delete_content(content.id)).unwrap();

        content.duration_ms = Some(1_000);
        assert!(matches!(
            store.save_content(&mut content),
            Err(DatabaseError::RowMissing { table: "contents", .. })
        ));
        assert!(store.get_content(content.id).unwrap().is_none());
        assert!(store.content_by_hash("abc").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_writers_leave_cache_matching_database() {
        let store = std::sync::Arc::new(store());
        let ids: Vec<i64> = store
            .transaction(|tx| {
                let c = tx.insert_content("abc", 1)?;
                (0..20)
                    .map(|i| tx.insert_placement(1, &format!("ep{}.mkv", i), c.id).map(|p| p.id))
                    .collect()
            })
            .unwrap();

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let deleter = std::sync::Arc::clone(&store);
                let saver = std::sync::Arc::clone(&store);
                let record = store.get_placement(id).unwrap().unwrap();
                (
                    std::thread::spawn(move || {
                        deleter.transaction(|tx| tx.delete_placement(id)).unwrap();
                    }),
                    std::thread::spawn(move || {
                        let mut renamed = record;
                        renamed.relative_path = format!("renamed/{}", renamed.relative_path);
                        let _ = saver.save_placement(&renamed);
                    }),
                )
            })
            .collect();
        for (a, b) in handles {
            a.join().unwrap();
            b.join().unwrap();
        }

        let cached: Vec<i64> = store.all_placements().unwrap().iter().map(|p| p.id).collect();
        let stored: Vec<i64> = store
            .database()
            .with_conn(placement_repo::list)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(cached, stored);
        assert!(cached.is_empty());
    }
}
