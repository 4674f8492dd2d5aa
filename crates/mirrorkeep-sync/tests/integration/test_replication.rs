//! Initial replication: round trip, idempotence and exclusion

use std::path::{Path, PathBuf};

use mirrorkeep_sync::replication::ReplicationEngine;
use tempfile::TempDir;

use crate::common::{collecting, configuration, rule, snapshot, write};

fn populate(root: &Path) {
    write(&root.join("a.txt"), b"alpha");
    write(&root.join("docs/report.md"), b"# report");
    write(&root.join("docs/deep/nested/n.bin"), &[0u8, 1, 2, 3, 255]);
    write(&root.join("tmp/scratch.txt"), b"scratch");
    write(&root.join("tmp/more/x.txt"), b"x");
}

#[test]
fn test_round_trip_matches_source_minus_excludes() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let target = tmp.path().join("backup");
    populate(&data);

    let notifier = collecting();
    let config = configuration(
        &[rule(&[data.as_path()], &target, &[data.join("tmp").as_path()])],
        &notifier,
    );
    let engine = ReplicationEngine::new(notifier.clone());

    let results = engine.sync_all(&config);
    assert_eq!(results.len(), 1);
    let synced = results.into_iter().next().unwrap().unwrap();
    assert_eq!(synced.registrations.len(), 1);

    let mut expected = snapshot(&data);
    expected.retain(|relative, _| !relative.starts_with("tmp"));
    assert_eq!(snapshot(&target.join("data")), expected);
    assert!(!target.join("data/tmp").exists());
}

#[test]
fn test_second_run_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let target = tmp.path().join("backup");
    populate(&data);

    let notifier = collecting();
    let config = configuration(&[rule(&[data.as_path()], &target, &[])], &notifier);
    let engine = ReplicationEngine::new(notifier.clone());

    let first = engine.sync_all(&config).remove(0).unwrap();
    assert_eq!(first.stats.copied, 5);

    let second = engine.sync_all(&config).remove(0).unwrap();
    assert_eq!(second.stats.copied, 0);
    assert_eq!(second.stats.replaced, 0);
    assert_eq!(second.stats.skipped, 5);
}

#[test]
fn test_changed_file_is_replaced_and_stale_target_files_are_kept() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let target = tmp.path().join("backup");
    populate(&data);

    let notifier = collecting();
    let config = configuration(&[rule(&[data.as_path()], &target, &[])], &notifier);
    let engine = ReplicationEngine::new(notifier.clone());
    engine.sync_all(&config).remove(0).unwrap();

    write(&data.join("a.txt"), b"alpha, edited");
    write(&target.join("data/only-in-target.txt"), b"kept");

    let rerun = engine.sync_all(&config).remove(0).unwrap();
    assert_eq!(rerun.stats.replaced, 1);
    assert_eq!(std::fs::read(target.join("data/a.txt")).unwrap(), b"alpha, edited");
    assert!(target.join("data/only-in-target.txt").exists());
}

#[test]
fn test_multiple_include_paths_land_under_their_basenames() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let notes = tmp.path().join("notes.txt");
    let target = tmp.path().join("backup");
    populate(&data);
    write(&notes, b"remember");

    let notifier = collecting();
    let config = configuration(
        &[rule(&[data.as_path(), notes.as_path()], &target, &[])],
        &notifier,
    );
    let engine = ReplicationEngine::new(notifier.clone());
    let synced = engine.sync_all(&config).remove(0).unwrap();

    let roots: Vec<PathBuf> = synced
        .registrations
        .iter()
        .map(|r| r.target_root.clone())
        .collect();
    assert_eq!(roots, vec![target.join("data"), target.join("notes.txt")]);
    assert_eq!(std::fs::read(target.join("notes.txt")).unwrap(), b"remember");
}
