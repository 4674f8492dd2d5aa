//! Live reflection of source changes through running watchers

use std::sync::Arc;
use std::time::Duration;

use mirrorkeep_core::ports::notifier::Severity;
use mirrorkeep_sync::retry::RetryQueue;
use mirrorkeep_sync::supervisor::Supervisor;
use tempfile::TempDir;

use crate::common::{collecting, configuration, rule, wait_until, write};

const SETTLE: Duration = Duration::from_secs(5);

#[test]
fn test_excluded_changes_are_not_mirrored_and_others_are() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let target = tmp.path().join("backup");
    write(&data.join("existing.txt"), b"old");
    std::fs::create_dir_all(data.join("tmp")).unwrap();

    let notifier = collecting();
    let config = configuration(
        &[rule(&[data.as_path()], &target, &[data.join("tmp").as_path()])],
        &notifier,
    );
    let retry = Arc::new(RetryQueue::new(Duration::from_secs(60), notifier.clone()));
    let supervisor = Supervisor::new(retry, notifier.clone());
    assert_eq!(supervisor.start_initial(&config), 1);
    assert!(target.join("data/existing.txt").exists());

    // A file in the excluded directory never appears
    write(&data.join("tmp/ignored.txt"), b"nope");
    // A regular file does, with identical bytes
    write(&data.join("a.txt"), b"fresh contents");

    let mirrored = target.join("data/a.txt");
    assert!(wait_until(SETTLE, || {
        std::fs::read(&mirrored).map(|b| b == b"fresh contents").unwrap_or(false)
    }));
    assert!(!target.join("data/tmp/ignored.txt").exists());
    assert!(!target.join("data/tmp").exists());

    supervisor.shutdown();
    assert_eq!(notifier.count(Severity::Error), 0);
}

#[test]
fn test_modify_rename_and_delete_are_reflected() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let target = tmp.path().join("backup");
    write(&data.join("doc.txt"), b"v1");
    write(&data.join("dir/inner.txt"), b"inner");

    let notifier = collecting();
    let config = configuration(&[rule(&[data.as_path()], &target, &[])], &notifier);
    let retry = Arc::new(RetryQueue::new(Duration::from_secs(60), notifier.clone()));
    let supervisor = Supervisor::new(retry, notifier.clone());
    supervisor.start_initial(&config);

    let doc = target.join("data/doc.txt");
    std::fs::write(data.join("doc.txt"), b"version two").unwrap();
    assert!(wait_until(SETTLE, || {
        std::fs::read(&doc).map(|b| b == b"version two").unwrap_or(false)
    }));

    std::fs::rename(data.join("doc.txt"), data.join("renamed.txt")).unwrap();
    let renamed = target.join("data/renamed.txt");
    assert!(wait_until(SETTLE, || renamed.exists() && !doc.exists()));
    assert_eq!(std::fs::read(&renamed).unwrap(), b"version two");

    std::fs::remove_dir_all(data.join("dir")).unwrap();
    let inner_dir = target.join("data/dir");
    assert!(wait_until(SETTLE, || !inner_dir.exists()));

    supervisor.shutdown();
}

#[test]
fn test_no_reflection_after_shutdown() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let target = tmp.path().join("backup");
    std::fs::create_dir_all(&data).unwrap();

    let notifier = collecting();
    let config = configuration(&[rule(&[data.as_path()], &target, &[])], &notifier);
    let retry = Arc::new(RetryQueue::new(Duration::from_secs(60), notifier.clone()));
    let supervisor = Supervisor::new(retry, notifier.clone());
    supervisor.start_initial(&config);
    supervisor.shutdown();

    write(&data.join("late.txt"), b"late");
    std::thread::sleep(Duration::from_millis(300));
    assert!(!target.join("data/late.txt").exists());
}
