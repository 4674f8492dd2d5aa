//! Directory watching and change reflection
//!
//! Provides a [`DirectoryWatcher`] that wraps the `notify` crate to monitor
//! one source root, converting raw OS events into [`ChangeEvent`] values and
//! reflecting each of them onto the mirrored target tree as it arrives.
//!
//! ## Architecture
//!
//! ```text
//! inotify / FSEvents / ReadDirectoryChangesW
//!       │  (notify's own thread)
//!       ▼
//!  DirectoryWatcher ──→ EventReflector ──→ FsAction::execute()
//!                                               │ recoverable failure
//!                                               ▼
//!                                          RetryQueue
//! ```
//!
//! Events for one registration are handled synchronously, in delivery order.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use mirrorkeep_core::domain::rule::{matches_ignore, IncludeRule};
use mirrorkeep_core::ports::notifier::{Category, Notifier, Severity};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::filesystem;
use crate::retry::{PendingOperation, RetryQueue};
use crate::{Result, SyncError};

// ============================================================================
// ChangeEvent enum
// ============================================================================

/// Represents a filesystem change event detected by the watcher
///
/// These events are the internal representation used by the reflector,
/// decoupled from the `notify` crate's raw event types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A new file or directory was created at the given path
    Created(PathBuf),
    /// An existing file was modified (content or metadata changed)
    Modified(PathBuf),
    /// A file or directory was deleted from the given path
    Deleted(PathBuf),
    /// A file or directory was renamed/moved
    Renamed {
        /// The original path before the rename
        old: PathBuf,
        /// The new path after the rename
        new: PathBuf,
    },
}

impl ChangeEvent {
    /// Returns the path the event is about
    ///
    /// For rename events, this is the old (source) path.
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p) => p,
            ChangeEvent::Modified(p) => p,
            ChangeEvent::Deleted(p) => p,
            ChangeEvent::Renamed { old, .. } => old,
        }
    }
}

// ============================================================================
// WatchRegistration
// ============================================================================

/// Identifies the registration a pending operation belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub source_root: PathBuf,
    pub target_base: PathBuf,
}

/// Pairing of one source root with its mirror for an active rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRegistration {
    /// Watched include path
    pub source_root: PathBuf,
    /// The owning rule's target path
    pub target_base: PathBuf,
    /// `target_base/<basename(source_root)>`
    pub target_root: PathBuf,
    /// Excludes under `source_root`, relative to it
    pub ignore_patterns: Vec<PathBuf>,
}

impl WatchRegistration {
    pub fn new(source_root: PathBuf, target_base: PathBuf, ignore_patterns: Vec<PathBuf>) -> Self {
        let target_root = match source_root.file_name() {
            Some(name) => target_base.join(name),
            None => target_base.clone(),
        };
        Self {
            source_root,
            target_base,
            target_root,
            ignore_patterns,
        }
    }

    /// Registration for one include path of `rule`
    pub fn for_rule(rule: &IncludeRule, source_root: &Path) -> Self {
        Self::new(
            source_root.to_path_buf(),
            rule.target_path.clone(),
            rule.ignore_patterns_for(source_root),
        )
    }

    pub fn key(&self) -> WatchKey {
        WatchKey {
            source_root: self.source_root.clone(),
            target_base: self.target_base.clone(),
        }
    }

    /// Returns true if `path` falls under one of the ignore patterns
    pub fn is_ignored(&self, path: &Path) -> bool {
        matches_ignore(&self.source_root, &self.ignore_patterns, path)
    }

    /// Maps a source path onto the target tree
    ///
    /// Returns `None` for paths outside the source root.
    pub fn destination(&self, source_path: &Path) -> Option<PathBuf> {
        let relative = source_path.strip_prefix(&self.source_root).ok()?;
        if relative.as_os_str().is_empty() {
            Some(self.target_root.clone())
        } else {
            Some(self.target_root.join(relative))
        }
    }
}

// ============================================================================
// FsAction
// ============================================================================

/// One filesystem operation reflecting a source change onto the target
///
/// `execute` is re-run verbatim by the retry queue, so every variant
/// re-checks its preconditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsAction {
    /// Copy `src` to `dst` if `src` is a regular file
    Copy { src: PathBuf, dst: PathBuf },
    /// Remove `dst` (file or subtree)
    Delete { dst: PathBuf },
    /// Recopy `src` if it is a regular file and `dst` is missing or differs
    Replace { src: PathBuf, dst: PathBuf },
    /// Move `from` to `to`, discarding anything already at `to`
    Rename { from: PathBuf, to: PathBuf },
}

impl FsAction {
    /// Performs the operation; returns a description when something changed
    pub fn execute(&self) -> Result<Option<String>> {
        match self {
            FsAction::Copy { src, dst } => {
                if !src.is_file() {
                    return Ok(None);
                }
                filesystem::copy_file(src, dst)?;
                Ok(Some(format!("{} has been created", dst.display())))
            }
            FsAction::Delete { dst } => {
                if filesystem::remove_path(dst)? {
                    Ok(Some(format!("{} has been deleted", dst.display())))
                } else {
                    Ok(None)
                }
            }
            FsAction::Replace { src, dst } => {
                if !src.is_file() {
                    return Ok(None);
                }
                if dst.exists() && filesystem::files_identical(src, dst)? {
                    return Ok(None);
                }
                filesystem::copy_file(src, dst)?;
                Ok(Some(format!("{} has been replaced", dst.display())))
            }
            FsAction::Rename { from, to } => {
                filesystem::rename_replacing(from, to)?;
                Ok(Some(format!(
                    "{} has been moved to {}",
                    from.display(),
                    to.display()
                )))
            }
        }
    }

    /// Short human description used when the action is queued for retry
    pub fn describe(&self) -> String {
        match self {
            FsAction::Copy { dst, .. } => format!("Creation of {}", dst.display()),
            FsAction::Delete { dst } => format!("Deletion of {}", dst.display()),
            FsAction::Replace { dst, .. } => format!("Replace of {}", dst.display()),
            FsAction::Rename { from, to } => {
                format!("Rename of {} to {}", from.display(), to.display())
            }
        }
    }
}

// ============================================================================
// EventReflector
// ============================================================================

/// Applies change events of one registration to its target tree
#[derive(Clone)]
pub struct EventReflector {
    registration: WatchRegistration,
    retry: Arc<RetryQueue>,
    notifier: Arc<dyn Notifier>,
}

impl EventReflector {
    pub fn new(
        registration: WatchRegistration,
        retry: Arc<RetryQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registration,
            retry,
            notifier,
        }
    }

    /// Translates an event into the action that mirrors it, if any
    pub fn plan(&self, event: &ChangeEvent) -> Option<FsAction> {
        let renamed = matches!(event, ChangeEvent::Renamed { .. });
        if !renamed && self.registration.is_ignored(event.path()) {
            debug!(path = %event.path().display(), "Ignoring excluded path");
            return None;
        }

        match event {
            ChangeEvent::Created(src) => Some(FsAction::Copy {
                src: src.clone(),
                dst: self.registration.destination(src)?,
            }),
            ChangeEvent::Deleted(src) => Some(FsAction::Delete {
                dst: self.registration.destination(src)?,
            }),
            ChangeEvent::Modified(src) => Some(FsAction::Replace {
                src: src.clone(),
                dst: self.registration.destination(src)?,
            }),
            ChangeEvent::Renamed { old, new } => self.plan_rename(old, new),
        }
    }

    /// A rename across the ignore boundary becomes a delete or a copy
    fn plan_rename(&self, old: &Path, new: &Path) -> Option<FsAction> {
        match (
            self.registration.is_ignored(old),
            self.registration.is_ignored(new),
        ) {
            (true, true) => {
                debug!(path = %old.display(), "Ignoring excluded path");
                None
            }
            (false, true) => Some(FsAction::Delete {
                dst: self.registration.destination(old)?,
            }),
            (true, false) => Some(FsAction::Copy {
                src: new.to_path_buf(),
                dst: self.registration.destination(new)?,
            }),
            (false, false) => {
                // A move that keeps the name duplicates the modify signal on some platforms
                if !name_changed(old, new) {
                    return None;
                }
                let from = self.registration.destination(old)?;
                let to = self.registration.destination(new)?;
                if !from.exists() {
                    return None;
                }
                Some(FsAction::Rename { from, to })
            }
        }
    }

    /// Reflects one event, routing recoverable failures to the retry queue
    pub fn handle(&self, event: &ChangeEvent) {
        if let Some(action) = self.plan(event) {
            self.apply(action);
        }
    }

    fn apply(&self, action: FsAction) {
        match action.execute() {
            Ok(Some(message)) => {
                self.notifier
                    .notify(&message, Category::Monitor, Severity::Info);
            }
            Ok(None) => {}
            Err(err) if err.is_recoverable() => {
                let description = action.describe();
                debug!(error = %err, "Recoverable failure, deferring");
                self.notifier.notify(
                    &format!("{description} operation has been queued"),
                    Category::RetryOperation,
                    Severity::Info,
                );
                self.retry.enqueue(PendingOperation::new(
                    self.registration.key(),
                    description,
                    move || action.execute().map(|_| ()),
                ));
            }
            Err(err) => {
                self.notifier
                    .notify(&err.to_string(), Category::Monitor, Severity::Error);
            }
        }
    }
}

// ============================================================================
// DirectoryWatcher
// ============================================================================

/// Lifecycle state of a [`DirectoryWatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Running,
}

/// Live subscription for one [`WatchRegistration`]
///
/// ## Usage
///
/// ```ignore
/// let mut watcher = DirectoryWatcher::new(registration, retry, notifier);
/// watcher.start()?;
/// // events are reflected from notify's thread
/// watcher.stop(); // no callback runs after this returns
/// ```
pub struct DirectoryWatcher {
    registration: WatchRegistration,
    retry: Arc<RetryQueue>,
    notifier: Arc<dyn Notifier>,
    state: WatcherState,
    /// The underlying notify watcher instance
    watcher: Option<RecommendedWatcher>,
    /// Shared with the notify callback; cleared on stop
    reflector: Arc<Mutex<Option<EventReflector>>>,
}

impl DirectoryWatcher {
    pub fn new(
        registration: WatchRegistration,
        retry: Arc<RetryQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registration,
            retry,
            notifier,
            state: WatcherState::Stopped,
            watcher: None,
            reflector: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registration(&self) -> &WatchRegistration {
        &self.registration
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Subscribes to changes under the source root
    ///
    /// Directories are watched recursively, a single file non-recursively.
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or the path
    /// cannot be watched (missing, permissions, watch limit reached)
    pub fn start(&mut self) -> Result<()> {
        if self.state == WatcherState::Running {
            return Ok(());
        }

        let source_root = self.registration.source_root.clone();
        info!(path = %source_root.display(), "Starting watch");

        *lock(&self.reflector) = Some(EventReflector::new(
            self.registration.clone(),
            Arc::clone(&self.retry),
            Arc::clone(&self.notifier),
        ));

        let reflector = Arc::clone(&self.reflector);
        let notifier = Arc::clone(&self.notifier);
        let mut pairing = RenamePairing::default();
        let created = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = pairing.map(&event) {
                        // Holding the lock while handling lets stop() wait for us
                        if let Some(reflector) = lock(&reflector).as_ref() {
                            reflector.handle(&change);
                        }
                    }
                }
                Err(err) => {
                    notifier.notify(
                        &format!("File watcher error: {err}"),
                        Category::Monitor,
                        Severity::Error,
                    );
                }
            },
            notify::Config::default(),
        );

        let mode = if source_root.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let watcher = created.and_then(|mut watcher| {
            watcher.watch(&source_root, mode)?;
            Ok(watcher)
        });

        match watcher {
            Ok(watcher) => {
                self.watcher = Some(watcher);
                self.state = WatcherState::Running;
                Ok(())
            }
            Err(err) => {
                *lock(&self.reflector) = None;
                Err(SyncError::Watch(err))
            }
        }
    }

    /// Unsubscribes and waits until no callback is executing
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            let source_root = &self.registration.source_root;
            if let Err(err) = watcher.unwatch(source_root) {
                // The root may already be gone together with its watch
                debug!(path = %source_root.display(), error = %err, "Unwatch failed");
            }
            drop(watcher);
            info!(path = %source_root.display(), "Stopped watch");
        }
        *lock(&self.reflector) = None;
        self.state = WatcherState::Stopped;
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if self.state == WatcherState::Running {
            warn!(
                path = %self.registration.source_root.display(),
                "Watcher dropped while running, stopping"
            );
            self.stop();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Event mapping - notify::Event → ChangeEvent
// ============================================================================

/// Converts a `notify::Event` into our internal `ChangeEvent`
///
/// Maps the notify event kinds as follows:
/// - `Create(*)` -> `ChangeEvent::Created`
/// - `Modify(Name(Both))` with 2 paths -> `ChangeEvent::Renamed`
/// - `Modify(Name(To))` -> `ChangeEvent::Created` (moved in, see [`RenamePairing`])
/// - `Modify(Name(From))` -> ignored (its pair arrives as `Both`)
/// - `Remove(*)` -> `ChangeEvent::Deleted`
/// - Other `Modify(*)` -> `ChangeEvent::Modified`
///
/// Returns `None` for events that have no associated paths or that should
/// be ignored (e.g., access events).
fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => Some(ChangeEvent::Created(paths.first()?.clone())),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                Some(ChangeEvent::Renamed {
                    old: paths[0].clone(),
                    new: paths[1].clone(),
                })
            } else {
                Some(ChangeEvent::Modified(paths.first()?.clone()))
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            Some(ChangeEvent::Created(paths.first()?.clone()))
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => None,

        EventKind::Remove(_) => Some(ChangeEvent::Deleted(paths.first()?.clone())),

        EventKind::Modify(_) => Some(ChangeEvent::Modified(paths.first()?.clone())),

        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            None
        }
    }
}

/// Drops the `Name(To)` half of a move whose `Name(From)` half was seen
///
/// inotify reports a move inside the watched tree as `From`, `To`, then
/// `Both`, all sharing one tracker cookie. Only `Both` describes the move;
/// a lone `To` is an entry arriving from outside the tree.
#[derive(Debug, Default)]
struct RenamePairing {
    origins: VecDeque<usize>,
}

impl RenamePairing {
    /// Moves out of the tree never see their `To`, so old cookies are dropped
    const CAPACITY: usize = 64;

    fn map(&mut self, event: &notify::Event) -> Option<ChangeEvent> {
        match (&event.kind, event.tracker()) {
            (EventKind::Modify(ModifyKind::Name(RenameMode::From)), Some(cookie)) => {
                if self.origins.len() == Self::CAPACITY {
                    self.origins.pop_front();
                }
                self.origins.push_back(cookie);
                None
            }
            (EventKind::Modify(ModifyKind::Name(RenameMode::To)), Some(cookie))
                if self.origins.contains(&cookie) =>
            {
                None
            }
            (EventKind::Modify(ModifyKind::Name(RenameMode::Both)), Some(cookie)) => {
                self.origins.retain(|seen| *seen != cookie);
                map_notify_event(event)
            }
            _ => map_notify_event(event),
        }
    }
}

/// Returns true if the last components of both paths differ
pub fn name_changed(old: &Path, new: &Path) -> bool {
    old.file_name().map(OsStr::to_os_string) != new.file_name().map(OsStr::to_os_string)
}

// ============================================================================
// Unit tests
// ============================================================================
