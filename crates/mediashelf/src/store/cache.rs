use std::collections::{BTreeSet, HashMap};

use crate::model::{ContentRecord, PlacementRecord, StorageLocation};

/// A single mutation recorded by a store transaction, replayed onto the
/// cache after commit.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    Location(StorageLocation),
    LocationRemoved(i64),
    Content(ContentRecord),
    ContentRemoved(i64),
    Placement(PlacementRecord),
    PlacementRemoved(i64),
}

/// In-memory indexes over locations, contents and placements.
#[derive(Debug, Default)]
pub(crate) struct Cache {
    pub locations: HashMap<i64, StorageLocation>,
    pub contents: HashMap<i64, ContentRecord>,
    pub contents_by_hash: HashMap<String, BTreeSet<i64>>,
    pub placements: HashMap<i64, PlacementRecord>,
    pub placements_by_path: HashMap<(i64, String), i64>,
    pub placements_by_content: HashMap<i64, BTreeSet<i64>>,
}

impl Cache {
    pub fn load(
        locations: Vec<StorageLocation>,
        contents: Vec<ContentRecord>,
        placements: Vec<PlacementRecord>,
    ) -> Self {
        let mut cache = Cache::default();
        for l in locations {
            cache.apply(Change::Location(l));
        }
        for c in contents {
            cache.apply(Change::Content(c));
        }
        for p in placements {
            cache.apply(Change::Placement(p));
        }
        cache
    }

    pub fn apply(&mut self, change: Change) {
        match change {
            Change::Location(l) => {
                self.locations.insert(l.id, l);
            }
            Change::LocationRemoved(id) => {
                self.locations.remove(&id);
            }
            Change::Content(c) => {
                self.unindex_content(c.id);
                self.contents_by_hash
                    .entry(c.hash.clone())
                    .or_default()
                    .insert(c.id);
                self.contents.insert(c.id, c);
            }
            Change::ContentRemoved(id) => {
                self.unindex_content(id);
                self.contents.remove(&id);
            }
            Change::Placement(p) => {
                self.unindex_placement(p.id);
                self.placements_by_path
                    .insert((p.location_id, p.relative_path.clone()), p.id);
                self.placements_by_content
                    .entry(p.content_id)
                    .or_default()
                    .insert(p.id);
                self.placements.insert(p.id, p);
            }
            Change::PlacementRemoved(id) => {
                self.unindex_placement(id);
                self.placements.remove(&id);
            }
        }
    }

    fn unindex_content(&mut self, id: i64) {
        if let Some(old) = self.contents.get(&id) {
            if let Some(ids) = self.contents_by_hash.get_mut(&old.hash) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.contents_by_hash.remove(&old.hash);
                }
            }
        }
    }

    fn unindex_placement(&mut self, id: i64) {
        if let Some(old) = self.placements.get(&id) {
            let key = (old.location_id, old.relative_path.clone());
            if self.placements_by_path.get(&key) == Some(&id) {
                self.placements_by_path.remove(&key);
            }
            if let Some(ids) = self.placements_by_content.get_mut(&old.content_id) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.placements_by_content.remove(&old.content_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn content(id: i64, hash: &str) -> ContentRecord {
        ContentRecord {
            id,
            hash: hash.into(),
            file_size: 1,
            duration_ms: None,
            media_info: None,
            is_ignored: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_rehash_moves_hash_index() {
        let mut cache = Cache::default();
        cache.apply(Change::Content(content(1, "old")));
        cache.apply(Change::Content(content(1, "new")));
        assert!(!cache.contents_by_hash.contains_key("old"));
        assert!(cache.contents_by_hash["new"].contains(&1));
    }

    #[test]
    fn test_moving_placement_updates_indexes() {
        let mut cache = Cache::default();
        let p = PlacementRecord {
            id: 5,
            location_id: 1,
            relative_path: "a.mkv".into(),
            content_id: 10,
        };
        cache.apply(Change::Placement(p.clone()));
        cache.apply(Change::Placement(PlacementRecord {
            location_id: 2,
            relative_path: "b.mkv".into(),
            content_id: 11,
            ..p
        }));
        assert!(!cache.placements_by_path.contains_key(&(1, "a.mkv".into())));
        assert_eq!(cache.placements_by_path[&(2, "b.mkv".into())], 5);
        assert!(!cache.placements_by_content.contains_key(&10));

        cache.apply(Change::PlacementRemoved(5));
        assert!(cache.placements.is_empty());
        assert!(cache.placements_by_content.is_empty());
    }
}
