//! Watcher lifecycle for the controlling process
//!
//! The [`Supervisor`] owns every running [`DirectoryWatcher`]. It installs
//! watchers for rules after their initial replication succeeds, tears them
//! down when a rule's drive disappears, and drops the retry operations
//! those watchers left behind.

use std::sync::{Arc, Mutex, MutexGuard};

use mirrorkeep_core::domain::rule::{Configuration, IncludeRule};
use mirrorkeep_core::ports::notifier::{Category, Notifier, Severity};
use tracing::{debug, info};

use crate::replication::{ReplicationEngine, RuleSync};
use crate::retry::RetryQueue;
use crate::watcher::{DirectoryWatcher, WatchKey, WatchRegistration};
use crate::Result;

/// Starts and stops replication work as rules come and go
pub struct Supervisor {
    engine: ReplicationEngine,
    retry: Arc<RetryQueue>,
    notifier: Arc<dyn Notifier>,
    watchers: Mutex<Vec<DirectoryWatcher>>,
}

impl Supervisor {
    pub fn new(retry: Arc<RetryQueue>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            engine: ReplicationEngine::new(Arc::clone(&notifier)),
            retry,
            notifier,
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Replicates every active rule and watches the ones that succeeded
    pub fn start_initial(&self, config: &Configuration) -> usize {
        let results = self.engine.sync_all(config);
        self.install(results)
    }

    /// Handles newly activated rules: sync them, then watch them
    ///
    /// Returns the number of watchers started.
    pub fn activate(&self, rules: &[IncludeRule]) -> usize {
        let results = self.engine.sync_rules(rules);
        self.install(results)
    }

    /// Handles newly deactivated rules
    ///
    /// Stops each watcher whose target base is the rule's target path and
    /// whose source root is one of its include paths, then removes the
    /// pending operations those watchers queued. Returns the number of
    /// watchers stopped.
    pub fn deactivate(&self, rules: &[IncludeRule]) -> usize {
        let stopped: Vec<WatchKey> = {
            let mut watchers = self.watchers();
            let (matching, kept): (Vec<_>, Vec<_>) = watchers
                .drain(..)
                .partition(|w| rules.iter().any(|rule| owns(rule, w.registration())));
            *watchers = kept;

            matching
                .into_iter()
                .map(|mut watcher| {
                    watcher.stop();
                    watcher.registration().key()
                })
                .collect()
        };

        for key in &stopped {
            let pending = self.retry.pending_for(key);
            if !pending.is_empty() {
                let removed = self.retry.dequeue(&pending);
                debug!(
                    source = %key.source_root.display(),
                    removed,
                    "Dropped pending operations of stopped watcher"
                );
            }
        }

        if !stopped.is_empty() {
            info!(count = stopped.len(), "Watchers stopped for deactivated rules");
        }
        stopped.len()
    }

    /// Stops every watcher; no reflection happens after this returns
    pub fn shutdown(&self) {
        let mut watchers = self.watchers();
        for watcher in watchers.iter_mut() {
            watcher.stop();
        }
        let count = watchers.len();
        watchers.clear();
        info!(count, "All watchers stopped");
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers().len()
    }

    /// Keys of the running watchers, in installation order
    pub fn watched(&self) -> Vec<WatchKey> {
        self.watchers()
            .iter()
            .map(|w| w.registration().key())
            .collect()
    }

    fn install(&self, results: Vec<Result<RuleSync>>) -> usize {
        let mut started = 0;
        for synced in results.into_iter().flatten() {
            for registration in synced.registrations {
                if self.start_watcher(registration) {
                    started += 1;
                }
            }
        }
        started
    }

    fn start_watcher(&self, registration: WatchRegistration) -> bool {
        let mut watchers = self.watchers();
        let key = registration.key();
        if watchers.iter().any(|w| w.registration().key() == key) {
            debug!(source = %key.source_root.display(), "Already watched");
            return false;
        }

        let mut watcher = DirectoryWatcher::new(
            registration,
            Arc::clone(&self.retry),
            Arc::clone(&self.notifier),
        );
        match watcher.start() {
            Ok(()) => {
                watchers.push(watcher);
                true
            }
            Err(err) => {
                self.notifier.notify(
                    &format!(
                        "Unable to watch '{}': {err}",
                        key.source_root.display()
                    ),
                    Category::Monitor,
                    Severity::Error,
                );
                false
            }
        }
    }

    fn watchers(&self) -> MutexGuard<'_, Vec<DirectoryWatcher>> {
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn owns(rule: &IncludeRule, registration: &WatchRegistration) -> bool {
    registration.target_base == rule.target_path
        && rule.include_paths.contains(&registration.source_root)
}

// ============================================================================
// Unit tests
// ============================================================================
