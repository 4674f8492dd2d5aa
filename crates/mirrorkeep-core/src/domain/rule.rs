//! Include/exclude rule model
//!
//! A [`Configuration`] owns an ordered list of [`IncludeRule`]s. Each rule
//! maps one or more source paths onto a single target directory and carries
//! a set of excluded sub-paths.
//!
//! ## Traversal
//!
//! Every pass over the rules goes through [`Configuration::traverse`], which
//! invokes one handler for the configuration, one per rule and one per
//! exclude path (with its parent rule as context). Exclude validation
//! ([`Configuration::validate`]) and drive activation
//! ([`Configuration::refresh_activation`]) are both expressed on top of it.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::config::{Config, RawInclude};
use crate::domain::errors::ConfigError;
use crate::ports::notifier::{Category, Notifier, Severity};

const NO_INCLUDE_PATHS: &str = "You have not specified any valid include paths";

// ============================================================================
// IncludeRule
// ============================================================================

/// One configured mapping from source paths to a target directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeRule {
    /// Absolute source paths, in configuration order (never empty)
    pub include_paths: Vec<PathBuf>,
    /// Absolute target directory; each source lands in `target/<basename>`
    pub target_path: PathBuf,
    /// Absolute excluded paths, each under one of `include_paths` after validation
    pub excludes: Vec<PathBuf>,
    /// Whether the target drive is present and the rule may sync/watch
    pub is_active: bool,
}

impl IncludeRule {
    /// Creates an active rule from already-normalised paths
    pub fn new(include_paths: Vec<PathBuf>, target_path: PathBuf, excludes: Vec<PathBuf>) -> Self {
        Self {
            include_paths,
            target_path,
            excludes,
            is_active: true,
        }
    }

    /// Ignore patterns for one include path: the excludes under it, relative to it
    pub fn ignore_patterns_for(&self, source_root: &Path) -> Vec<PathBuf> {
        self.excludes
            .iter()
            .filter(|exclude| is_sub_path(exclude, source_root))
            .filter_map(|exclude| exclude.strip_prefix(source_root).ok())
            .map(Path::to_path_buf)
            .collect()
    }

    /// Where `source_root` is mirrored: `target_path/<basename(source_root)>`
    pub fn target_root_for(&self, source_root: &Path) -> PathBuf {
        match source_root.file_name() {
            Some(name) => self.target_path.join(name),
            None => self.target_path.clone(),
        }
    }

    /// Root of the volume holding the target path
    pub fn drive_root(&self) -> PathBuf {
        drive_root(&self.target_path)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// The validated rule set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Configuration {
    /// Include rules in configuration order (never empty)
    pub includes: Vec<IncludeRule>,
}

/// Decision returned by the per-exclude traversal handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludeVerdict {
    /// Keep the exclude in its parent rule
    Keep,
    /// Remove the exclude from its parent rule
    Drop,
}

/// Rules whose activity flipped during an activation refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationChanges {
    /// Rules that went from inactive to active
    pub activated: Vec<IncludeRule>,
    /// Rules that went from active to inactive
    pub deactivated: Vec<IncludeRule>,
}

impl ActivationChanges {
    /// Returns true if no rule changed state
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty() && self.deactivated.is_empty()
    }
}

impl Configuration {
    /// Builds a configuration, failing when there are no rules
    pub fn new(includes: Vec<IncludeRule>) -> Result<Self, ConfigError> {
        if includes.is_empty() {
            return Err(ConfigError::Invalid("No includes specified".into()));
        }
        Ok(Self { includes })
    }

    /// Parses the raw file model into rules
    ///
    /// Non-existent include and exclude paths are dropped with a warning.
    /// Fails with [`ConfigError::Invalid`] when `includes` is absent or empty,
    /// when a rule keeps no existing include path, or when a rule has no
    /// `targetPath`.
    pub fn parse(raw: &Config, notifier: &dyn Notifier) -> Result<Self, ConfigError> {
        let mut includes = Vec::new();
        for raw_include in raw.includes.iter().flatten().flatten() {
            includes.push(parse_include(raw_include, notifier)?);
        }
        Self::new(includes)
    }

    /// Walks the configuration, every rule, and every exclude of every rule
    ///
    /// `on_rule` is called before the rule's excludes, which are then visited
    /// with the rule as parent. Excludes for which `on_exclude` answers
    /// [`ExcludeVerdict::Drop`] are removed from the rule.
    pub fn traverse<C, R, E>(&mut self, mut on_configuration: C, mut on_rule: R, mut on_exclude: E)
    where
        C: FnMut(&Configuration),
        R: FnMut(&mut IncludeRule),
        E: FnMut(&IncludeRule, &Path) -> ExcludeVerdict,
    {
        on_configuration(self);
        for rule in &mut self.includes {
            on_rule(rule);
            let parent: &IncludeRule = rule;
            let verdicts: Vec<ExcludeVerdict> = parent
                .excludes
                .iter()
                .map(|exclude| on_exclude(parent, exclude))
                .collect();
            let mut verdicts = verdicts.into_iter();
            rule.excludes
                .retain(|_| verdicts.next() == Some(ExcludeVerdict::Keep));
        }
    }

    /// Drops every exclude that is not a proper sub-path of its rule's include paths
    pub fn validate(&mut self, notifier: &dyn Notifier) {
        self.traverse(
            |_| {},
            |_| {},
            |parent, exclude| {
                let covered = parent
                    .include_paths
                    .iter()
                    .any(|include| is_sub_path(exclude, include));
                if covered {
                    ExcludeVerdict::Keep
                } else {
                    notifier.notify(
                        &format!(
                            "Exclude path \"{}\" is not a subfolder of any of {:?}",
                            exclude.display(),
                            parent.include_paths
                        ),
                        Category::InvalidConfig,
                        Severity::Warning,
                    );
                    ExcludeVerdict::Drop
                }
            },
        );
    }

    /// Recomputes every rule's `is_active` from the presence of its drive root
    ///
    /// Returns the rules that flipped, as snapshots taken after the flip.
    pub fn refresh_activation<P>(&mut self, is_present: P, notifier: &dyn Notifier) -> ActivationChanges
    where
        P: Fn(&Path) -> bool,
    {
        let mut changes = ActivationChanges::default();
        self.traverse(
            |_| {},
            |rule| {
                let was_active = rule.is_active;
                let root = rule.drive_root();
                rule.is_active = is_present(&root);
                if was_active == rule.is_active {
                    return;
                }
                if rule.is_active {
                    notifier.notify(
                        &format!(
                            "Rule for target path '{}' is activated",
                            rule.target_path.display()
                        ),
                        Category::DeviceMonitoring,
                        Severity::Info,
                    );
                    changes.activated.push(rule.clone());
                } else {
                    notifier.notify(
                        &format!(
                            "Rule for target path '{}' is deactivated because the drive '{}' \
                             does not exist. Once the device is plugged in, the rule will be activated",
                            rule.target_path.display(),
                            root.display()
                        ),
                        Category::DeviceMonitoring,
                        Severity::Warning,
                    );
                    changes.deactivated.push(rule.clone());
                }
            },
            |_, _| ExcludeVerdict::Keep,
        );
        changes
    }

    /// Rules currently eligible for sync and watching
    pub fn active_rules(&self) -> Vec<IncludeRule> {
        self.includes.iter().filter(|r| r.is_active).cloned().collect()
    }

    /// Pretty JSON rendering of the rule set, for diagnostics
    pub fn describe(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unprintable: {e}>"))
    }
}

fn parse_include(raw: &RawInclude, notifier: &dyn Notifier) -> Result<IncludeRule, ConfigError> {
    let requested = raw.paths.as_deref().unwrap_or_default();
    if requested.is_empty() {
        return Err(ConfigError::Invalid(NO_INCLUDE_PATHS.into()));
    }

    let include_paths = existing_paths(requested, notifier);
    if include_paths.is_empty() {
        return Err(ConfigError::Invalid(NO_INCLUDE_PATHS.into()));
    }

    let target_path = match raw.target_path.as_deref().map(str::trim) {
        Some(target) if !target.is_empty() => normalize_path(Path::new(target)),
        _ => return Err(ConfigError::Invalid("'targetPath' is unspecified".into())),
    };

    let excludes = existing_paths(raw.excludes.as_deref().unwrap_or_default(), notifier);

    Ok(IncludeRule::new(include_paths, target_path, excludes))
}

/// Normalises and deduplicates `paths`, dropping (with a warning) those that do not exist
fn existing_paths(paths: &[String], notifier: &dyn Notifier) -> Vec<PathBuf> {
    let mut kept: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for raw in paths {
        let candidate = normalize_path(Path::new(raw.trim()));
        if raw.trim().is_empty() || !candidate.exists() {
            let err = ConfigError::PathNotFound(PathBuf::from(raw));
            notifier.notify(&err.to_string(), Category::InvalidConfig, Severity::Warning);
            continue;
        }
        if !kept.contains(&candidate) {
            kept.push(candidate);
        }
    }
    kept
}

// ============================================================================
// Path helpers
// ============================================================================

/// Returns true if `path` lies strictly below `base` (component-wise)
pub fn is_sub_path(path: &Path, base: &Path) -> bool {
    path != base && path.starts_with(base)
}

/// Returns true if `path` starts with `source_root/<pattern>` for any pattern
pub fn matches_ignore(source_root: &Path, patterns: &[PathBuf], path: &Path) -> bool {
    patterns
        .iter()
        .any(|pattern| path.starts_with(source_root.join(pattern)))
}

/// Makes `path` absolute against the current directory and resolves `.`/`..` lexically
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Root of the volume that holds `target`
///
/// On Windows this is the drive prefix (`D:\`). Elsewhere it is the
/// removable-media mount directory when `target` lives under
/// `/media/<user>/<label>`, `/run/media/<user>/<label>`, `/mnt/<label>` or
/// `/Volumes/<label>`, and `/` otherwise.
pub fn drive_root(target: &Path) -> PathBuf {
    let mut components = target.components();
    if let Some(Component::Prefix(prefix)) = components.next() {
        let mut root = PathBuf::from(prefix.as_os_str());
        root.push(std::path::MAIN_SEPARATOR.to_string());
        return root;
    }

    let names: Vec<&std::ffi::OsStr> = target
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect();

    let depth = match names.first().and_then(|n| n.to_str()) {
        Some("media") => 3,
        Some("run") if names.get(1).and_then(|n| n.to_str()) == Some("media") => 4,
        Some("mnt") | Some("Volumes") => 2,
        _ => 0,
    };

    let mut root = PathBuf::from("/");
    if depth > 0 && names.len() >= depth {
        for name in &names[..depth] {
            root.push(name);
        }
    }
    root
}

// ============================================================================
// Tests
// ============================================================================
