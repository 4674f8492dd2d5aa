//! Deferred re-attempts driven by the async retry task

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mirrorkeep_core::ports::notifier::Category;
use mirrorkeep_sync::retry::{PendingOperation, RetryQueue, RetryState};
use mirrorkeep_sync::supervisor::Supervisor;
use mirrorkeep_sync::watcher::{FsAction, WatchKey};
use mirrorkeep_sync::SyncError;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{collecting, configuration, rule, wait_until, write};

#[tokio::test]
async fn test_locked_copy_is_retried_until_unlocked() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("data/a.txt");
    let dst = tmp.path().join("backup/data/a.txt");
    write(&src, b"payload");

    let notifier = collecting();
    let queue = Arc::new(RetryQueue::new(Duration::from_millis(30), notifier.clone()));
    let shutdown = CancellationToken::new();
    let driver = tokio::spawn(Arc::clone(&queue).run(shutdown.clone()));

    let locked = Arc::new(AtomicBool::new(true));
    let attempts = Arc::new(AtomicUsize::new(0));
    let action = FsAction::Copy {
        src: src.clone(),
        dst: dst.clone(),
    };
    let owner = WatchKey {
        source_root: tmp.path().join("data"),
        target_base: tmp.path().join("backup"),
    };
    {
        let locked = Arc::clone(&locked);
        let attempts = Arc::clone(&attempts);
        queue.enqueue(PendingOperation::new(owner, action.describe(), move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            if locked.load(Ordering::SeqCst) {
                return Err(SyncError::FileLocked(PathBuf::from("a.txt")));
            }
            action.execute().map(|_| ())
        }));
    }

    // Stays queued across several ticks while locked
    tokio::time::timeout(Duration::from_secs(5), async {
        while attempts.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("operation should be re-attempted");
    assert_eq!(queue.len(), 1);
    assert!(!dst.exists());

    locked.store(false, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("operation should eventually succeed");

    assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    assert_eq!(queue.state(), RetryState::Idle);

    // Removed exactly once: no further attempts after success
    let settled = attempts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), settled);

    shutdown.cancel();
    driver.await.unwrap();
}

#[cfg(unix)]
#[test]
fn test_live_event_blocked_by_permissions_is_queued_then_completed() {
    use std::os::unix::fs::PermissionsExt;

    // Permission bits do not stop root
    if unsafe { libc::geteuid() } == 0 {
        eprintln!("skipping: running as root");
        return;
    }

    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let target = tmp.path().join("backup");
    write(&data.join("existing.txt"), b"old");

    let notifier = collecting();
    let config = configuration(&[rule(&[data.as_path()], &target, &[])], &notifier);
    let retry = Arc::new(RetryQueue::new(Duration::from_secs(60), notifier.clone()));
    let supervisor = Supervisor::new(Arc::clone(&retry), notifier.clone());
    assert_eq!(supervisor.start_initial(&config), 1);

    let mirror_dir = target.join("data");
    std::fs::set_permissions(&mirror_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

    write(&data.join("fresh.txt"), b"payload");
    let key = WatchKey {
        source_root: data.clone(),
        target_base: target.clone(),
    };
    let queued = wait_until(Duration::from_secs(5), || !retry.pending_for(&key).is_empty());
    // Let the trailing modify events of the write land too
    std::thread::sleep(Duration::from_millis(200));

    std::fs::set_permissions(&mirror_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    assert!(queued, "blocked copy should be queued for retry");
    assert!(!mirror_dir.join("fresh.txt").exists());
    assert!(notifier.count_category(Category::RetryOperation) >= 1);

    let report = retry.tick();
    assert!(report.succeeded >= 1);
    assert_eq!(report.remaining, 0);
    assert!(retry.is_empty());
    assert_eq!(std::fs::read(mirror_dir.join("fresh.txt")).unwrap(), b"payload");

    supervisor.shutdown();
}
