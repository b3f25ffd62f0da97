//! Content identity: hashing, dedup by hash and catalog processing.

mod common;

use std::io::Cursor;
use std::path::Path;

use chrono::NaiveDate;

use common::*;
use mediashelf::identity::{self, hash_reader};
use mediashelf::queue::JobKind;
use mediashelf::storage::FileSystem;
use mediashelf::Outcome;

fn hash_of(data: &[u8]) -> String {
    hash_reader(&mut Cursor::new(data.to_vec())).unwrap()
}

#[test]
fn test_same_bytes_share_one_content_record() {
    let harness = TestHarness::new();
    let first = harness.add_registered(DROP_ID, "a.mkv", b"identical payload");
    let second = harness.add_registered(LIBRARY_ID, "Show/b.mkv", b"identical payload");

    assert!(first.created_content);
    assert!(!second.created_content);
    assert_eq!(first.content_id, second.content_id);
    assert_ne!(first.placement_id, second.placement_id);
    assert_eq!(harness.ctx.store.all_contents().unwrap().len(), 1);
    assert_eq!(
        harness
            .ctx
            .store
            .placements_for_content(first.content_id)
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn test_unchanged_size_skips_rehash() {
    let harness = TestHarness::new();
    let first = harness.add_registered(LIBRARY_ID, "ep.mkv", b"stable");
    let again = harness.register(LIBRARY_ID, "ep.mkv");

    assert!(first.rehashed);
    assert!(!again.rehashed);
    assert_eq!(first.content_id, again.content_id);

    let forced = identity::register(&harness.ctx, LIBRARY_ID, "ep.mkv", true).unwrap();
    assert!(forced.rehashed);
    assert_eq!(forced.hash, hash_of(b"stable"));
}

#[test]
fn test_changed_file_moves_placement_to_new_content() {
    let harness = TestHarness::new();
    let before = harness.add_registered(LIBRARY_ID, "ep.mkv", b"first cut");
    harness.clear_queue();

    harness.add_file(LIBRARY_ID, "ep.mkv", b"director's cut, longer");
    let after = harness.register(LIBRARY_ID, "ep.mkv");

    assert_eq!(before.placement_id, after.placement_id);
    assert_ne!(before.content_id, after.content_id);
    assert!(harness.ctx.store.get_content(before.content_id).unwrap().is_none());
    assert!(harness.pending_kinds().contains(&JobKind::DeleteExternalReference {
        hash: hash_of(b"first cut"),
        size: 9,
    }));
}

#[test]
fn test_legacy_unhashed_record_takes_the_hash() {
    let harness = TestHarness::new();
    harness.add_file(LIBRARY_ID, "old.avi", b"from before hashing");
    let legacy = harness
        .ctx
        .store
        .transaction(|tx| {
            let content = tx.insert_content("", 0)?;
            tx.insert_placement(LIBRARY_ID, "old.avi", content.id)?;
            Ok(content)
        })
        .unwrap();

    let reg = harness.register(LIBRARY_ID, "old.avi");

    assert_eq!(reg.content_id, legacy.id);
    assert!(!reg.created_content);
    let content = harness.ctx.store.get_content(legacy.id).unwrap().unwrap();
    assert_eq!(content.hash, hash_of(b"from before hashing"));
    assert_eq!(content.file_size, 19);
}

#[test]
fn test_missing_file_is_structural_and_drops_stale_record() {
    let harness = TestHarness::new();
    let reg = harness.add_registered(LIBRARY_ID, "gone.mkv", b"bytes");
    harness.fs.delete(Path::new("/library/gone.mkv")).unwrap();

    let outcome = identity::register(&harness.ctx, LIBRARY_ID, "gone.mkv", false).unwrap_err();

    assert_eq!(outcome.kind, Outcome::StructuralMismatch);
    assert!(harness
        .ctx
        .store
        .get_placement(reg.placement_id)
        .unwrap()
        .is_none());
}

#[test]
fn test_registration_queues_processing() {
    let harness = TestHarness::new();
    let reg = harness.add_registered(DROP_ID, "new.mkv", b"fresh");

    assert!(harness.pending_kinds().contains(&JobKind::ProcessFile {
        content_id: reg.content_id
    }));
}

#[test]
fn test_processing_stores_associations_and_queues_followups() {
    let harness = TestHarness::new();
    let data = b"identified episode";
    harness.metadata.identify(
        &hash_of(data),
        AssociationsBuilder::series(7, "Show")
            .episode(70, 1, NaiveDate::from_ymd_opt(2020, 1, 1))
            .duration_ms(1_320_000)
            .build(),
    );
    let reg = harness.add_registered(DROP_ID, "ep.mkv", data);
    harness.clear_queue();

    let outcome = identity::process_content(&harness.ctx, reg.content_id);

    assert_eq!(outcome.kind, Outcome::Success);
    let links = harness.ctx.store.associations_for_hash(&reg.hash).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].episode_id, 70);
    assert_eq!(links[0].series_id, 7);
    assert_eq!(
        harness
            .ctx
            .store
            .get_content(reg.content_id)
            .unwrap()
            .unwrap()
            .duration_ms,
        Some(1_320_000)
    );

    let pending = harness.pending_kinds();
    assert!(pending.contains(&JobKind::UpdateSeriesStats { series_id: 7 }));
    assert!(pending.contains(&JobKind::MoveFile {
        placement_id: reg.placement_id
    }));
    assert!(pending.contains(&JobKind::DownloadImage { series_id: 7 }));
}

#[test]
fn test_unknown_content_is_not_an_error() {
    let harness = TestHarness::new();
    let reg = harness.add_registered(DROP_ID, "mystery.mkv", b"nobody knows");
    harness.clear_queue();

    let outcome = identity::process_content(&harness.ctx, reg.content_id);

    assert_eq!(outcome.kind, Outcome::Success);
    assert!(harness.pending_kinds().is_empty());
}

#[test]
fn test_series_stats_count_files_and_missing_episodes() {
    let harness = TestHarness::new();
    let have = b"episode one";
    let other = b"episode two";
    let aired = NaiveDate::from_ymd_opt(2020, 1, 1);
    harness.metadata.identify(
        &hash_of(have),
        AssociationsBuilder::series(7, "Show").episode(70, 1, aired).build(),
    );
    harness.metadata.identify(
        &hash_of(other),
        AssociationsBuilder::series(7, "Show").episode(71, 2, aired).build(),
    );
    let kept = harness.add_registered(LIBRARY_ID, "Show/e1.mkv", have);
    identity::process_content(&harness.ctx, kept.content_id);
    let lost = harness.add_registered(LIBRARY_ID, "Show/e2.mkv", other);
    identity::process_content(&harness.ctx, lost.content_id);

    let mut touched = std::collections::BTreeSet::new();
    mediashelf::placement::remove_placement(&harness.ctx, lost.placement_id, &mut touched).unwrap();

    assert_eq!(
        identity::update_series_stats(&harness.ctx, 7).kind,
        Outcome::Success
    );
    let series = harness.ctx.store.get_series(7).unwrap().unwrap();
    assert_eq!(series.episode_count, 2);
    assert_eq!(series.episodes_with_files, 1);
    assert_eq!(series.missing_episodes, 1);
    assert_eq!(series.latest_local_air_date, aired);
    assert!(series.stats_updated_at.is_some());
}
