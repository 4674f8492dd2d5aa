//! Rules follow the presence of their target drive

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use mirrorkeep_core::domain::rule::IncludeRule;
use mirrorkeep_sync::drives::{DrivePresenceTracker, DriveProbe};
use mirrorkeep_sync::retry::RetryQueue;
use mirrorkeep_sync::supervisor::Supervisor;
use tempfile::TempDir;

use crate::common::{collecting, configuration, rule, write};

/// Drive roots reported present by the test
#[derive(Default)]
struct SwitchableProbe {
    present: Mutex<HashSet<PathBuf>>,
}

impl SwitchableProbe {
    fn plug(&self, root: &str) {
        self.present.lock().unwrap().insert(PathBuf::from(root));
    }

    fn unplug(&self, root: &str) {
        self.present.lock().unwrap().remove(Path::new(root));
    }
}

impl DriveProbe for SwitchableProbe {
    fn is_present(&self, root: &Path) -> bool {
        self.present.lock().unwrap().contains(root)
    }
}

#[test]
fn test_rule_on_absent_drive_activates_when_drive_appears() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let photos = tmp.path().join("photos");
    write(&data.join("a.txt"), b"a");
    write(&photos.join("p.jpg"), b"p");
    // Temporary directories live on the root volume
    let local_target = tmp.path().join("backup");
    let usb_target = PathBuf::from("/media/nobody/NO_SUCH_USB/backup");

    let notifier = collecting();
    let config = configuration(
        &[
            rule(&[data.as_path()], &local_target, &[]),
            rule(&[photos.as_path()], &usb_target, &[]),
        ],
        &notifier,
    );
    let config = Arc::new(RwLock::new(config));

    let retry = Arc::new(RetryQueue::new(Duration::from_secs(60), notifier.clone()));
    let supervisor = Arc::new(Supervisor::new(retry, notifier.clone()));
    let probe = Arc::new(SwitchableProbe::default());

    let on_activated = {
        let supervisor = Arc::clone(&supervisor);
        Box::new(move |rules: &[IncludeRule]| {
            supervisor.activate(rules);
        })
    };
    let on_deactivated = {
        let supervisor = Arc::clone(&supervisor);
        Box::new(move |rules: &[IncludeRule]| {
            supervisor.deactivate(rules);
        })
    };
    let tracker = DrivePresenceTracker::new(
        Arc::clone(&config),
        probe.clone(),
        notifier.clone(),
        on_activated,
        on_deactivated,
    );

    // Startup: nothing is present, so nothing is synced or watched
    let initial = tracker.refresh();
    assert_eq!(initial.deactivated.len(), 2);
    let snapshot = config.read().unwrap().clone();
    assert!(snapshot.includes.iter().all(|r| !r.is_active));
    assert_eq!(supervisor.start_initial(&snapshot), 0);
    assert!(!local_target.exists());

    // The local drive appears: only its rule is synced and watched
    probe.plug("/");
    let changes = tracker.devices_changed();
    assert_eq!(changes.activated.len(), 1);
    assert_eq!(changes.activated[0].target_path, local_target);
    assert_eq!(std::fs::read(local_target.join("data/a.txt")).unwrap(), b"a");
    assert_eq!(supervisor.watcher_count(), 1);
    assert!(!config.read().unwrap().includes[1].is_active);

    // And disappears again: its watcher is torn down
    probe.unplug("/");
    let changes = tracker.devices_changed();
    assert_eq!(changes.deactivated.len(), 1);
    assert_eq!(supervisor.watcher_count(), 0);
}
