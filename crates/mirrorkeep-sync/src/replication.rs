//! Initial replication of include rules into their targets
//!
//! For every active rule and every include path in it, the source tree is
//! copied into `target_path/<basename(include_path)>`:
//!
//! - identical destination files are skipped
//! - differing destination files are deleted, then copied
//! - missing destination files are copied, parents first
//!
//! Excluded subtrees are pruned during the walk and never descended into.
//! Any I/O failure abandons the whole rule; nothing here is retried.
//! A successful rule yields one [`WatchRegistration`] per include path.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mirrorkeep_core::domain::rule::{matches_ignore, Configuration, IncludeRule};
use mirrorkeep_core::ports::notifier::{Category, Notifier, Severity};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::filesystem;
use crate::watcher::WatchRegistration;
use crate::{Result, SyncError};

// ============================================================================
// Results
// ============================================================================

/// What happened to a single file during replication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// The destination did not exist
    Copied,
    /// The destination existed with different contents
    Replaced,
    /// The destination was already identical
    Skipped,
}

/// Per-file counters for one replication run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub copied: usize,
    pub replaced: usize,
    pub skipped: usize,
}

impl ReplicationStats {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Copied => self.copied += 1,
            FileOutcome::Replaced => self.replaced += 1,
            FileOutcome::Skipped => self.skipped += 1,
        }
    }

    fn absorb(&mut self, other: ReplicationStats) {
        self.copied += other.copied;
        self.replaced += other.replaced;
        self.skipped += other.skipped;
    }

    /// Files whose destination was written
    pub fn written(&self) -> usize {
        self.copied + self.replaced
    }
}

/// A successfully replicated rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSync {
    pub target_path: PathBuf,
    /// One per include path, in configuration order
    pub registrations: Vec<WatchRegistration>,
    pub stats: ReplicationStats,
}

// ============================================================================
// ReplicationEngine
// ============================================================================

/// Performs the initial copy of include rules
pub struct ReplicationEngine {
    notifier: Arc<dyn Notifier>,
}

impl ReplicationEngine {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Replicates every active rule of `config`
    pub fn sync_all(&self, config: &Configuration) -> Vec<Result<RuleSync>> {
        self.sync_rules(&config.active_rules())
    }

    /// Replicates the active rules among `rules`, in order
    ///
    /// A failing rule is reported and does not stop the others.
    pub fn sync_rules(&self, rules: &[IncludeRule]) -> Vec<Result<RuleSync>> {
        rules
            .iter()
            .filter(|rule| rule.is_active)
            .map(|rule| {
                let result = self.sync_rule(rule);
                if let Err(err) = &result {
                    self.notifier.notify(
                        &format!(
                            "Initial sync into '{}' abandoned: {err}",
                            rule.target_path.display()
                        ),
                        Category::CopyFiles,
                        Severity::Error,
                    );
                }
                result
            })
            .collect()
    }

    /// Replicates every include path of `rule`
    #[instrument(skip_all, fields(target = %rule.target_path.display()))]
    pub fn sync_rule(&self, rule: &IncludeRule) -> Result<RuleSync> {
        let mut stats = ReplicationStats::default();
        let mut registrations = Vec::with_capacity(rule.include_paths.len());

        for source_root in &rule.include_paths {
            let registration = WatchRegistration::for_rule(rule, source_root);
            let path_stats = self.replicate_path(
                &registration.source_root,
                &registration.target_root,
                &registration.ignore_patterns,
            )?;
            stats.absorb(path_stats);
            registrations.push(registration);
        }

        info!(
            copied = stats.copied,
            replaced = stats.replaced,
            skipped = stats.skipped,
            "Rule replicated"
        );
        Ok(RuleSync {
            target_path: rule.target_path.clone(),
            registrations,
            stats,
        })
    }

    /// Mirrors `source_root` into `target_root`, pruning ignored subtrees
    ///
    /// `patterns` are relative to `source_root`.
    pub fn replicate_path(
        &self,
        source_root: &Path,
        target_root: &Path,
        patterns: &[PathBuf],
    ) -> Result<ReplicationStats> {
        let mut stats = ReplicationStats::default();

        let walker = WalkDir::new(source_root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !matches_ignore(source_root, patterns, entry.path()));

        for entry in walker {
            let entry = entry.map_err(walk_error)?;
            let relative = entry
                .path()
                .strip_prefix(source_root)
                .unwrap_or_else(|_| Path::new(""));
            let destination = if relative.as_os_str().is_empty() {
                target_root.to_path_buf()
            } else {
                target_root.join(relative)
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                std::fs::create_dir_all(&destination)
                    .map_err(|e| SyncError::from_io(&destination, e))?;
            } else if file_type.is_file() {
                stats.record(sync_file(entry.path(), &destination)?);
            } else {
                debug!(path = %entry.path().display(), "Skipping special file");
            }
        }

        Ok(stats)
    }
}

/// Brings `dst` in line with `src`
pub fn sync_file(src: &Path, dst: &Path) -> Result<FileOutcome> {
    if !dst.exists() {
        filesystem::copy_file(src, dst)?;
        return Ok(FileOutcome::Copied);
    }
    if filesystem::files_identical(src, dst)? {
        return Ok(FileOutcome::Skipped);
    }
    filesystem::remove_path(dst)?;
    filesystem::copy_file(src, dst)?;
    Ok(FileOutcome::Replaced)
}

fn walk_error(err: walkdir::Error) -> SyncError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    match err.into_io_error() {
        Some(io_err) => SyncError::from_io(&path, io_err),
        None => SyncError::Io {
            path,
            source: io::Error::new(io::ErrorKind::Other, "filesystem loop"),
        },
    }
}

// ============================================================================
// Unit tests
// ============================================================================
