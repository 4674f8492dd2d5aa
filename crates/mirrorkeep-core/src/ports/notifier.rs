//! Notification sink port (driven/secondary port)
//!
//! Every core component reports through a single [`Notifier`] instead of
//! writing to the console or a log file directly. The sink is constructed
//! once at process start and passed to each component that needs it.
//!
//! ## Design Notes
//!
//! - `notify` is synchronous: it is called from filesystem-watch threads,
//!   the volume monitor thread and the retry timer alike.
//! - Delivery is fire-and-forget; implementations must not fail the caller.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Severity and Category
// ============================================================================

/// How serious a reported event is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Progress information (a file copied, a rule activated)
    Info,
    /// Something was skipped or deferred, but work continues
    Warning,
    /// An operation failed and was abandoned
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

/// Subsystem an event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Configuration parsing and validation
    InvalidConfig,
    /// Initial replication copies
    CopyFiles,
    /// Live change reflection
    Monitor,
    /// Deferred operation re-attempts
    RetryOperation,
    /// Volume arrival/removal handling
    DeviceMonitoring,
    /// Process start and shutdown
    Lifecycle,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::InvalidConfig => "Invalid configuration",
            Category::CopyFiles => "Unable to copy",
            Category::Monitor => "Monitor changes reflection",
            Category::RetryOperation => "Attempt execute operation",
            Category::DeviceMonitoring => "Device monitoring",
            Category::Lifecycle => "Lifecycle",
        };
        write!(f, "{}", s)
    }
}

/// A reported event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
    pub category: Category,
    pub severity: Severity,
}

// ============================================================================
// Notifier trait
// ============================================================================

/// Port trait for the single reporting sink shared by all components
pub trait Notifier: Send + Sync {
    /// Reports one event
    fn notify(&self, message: &str, category: Category, severity: Severity);
}

// ============================================================================
// Implementations
// ============================================================================

/// Forwards notices to `tracing` at the level matching their severity
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, category: Category, severity: Severity) {
        match severity {
            Severity::Info => info!(category = %category, "{message}"),
            Severity::Warning => warn!(category = %category, "{message}"),
            Severity::Error => error!(category = %category, "{message}"),
        }
    }
}

/// Keeps every notice in memory
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all notices received so far
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of notices with the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.notices()
            .iter()
            .filter(|n| n.severity == severity)
            .count()
    }

    /// Number of notices in the given category
    pub fn count_category(&self, category: Category) -> usize {
        self.notices()
            .iter()
            .filter(|n| n.category == category)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.notices().is_empty()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, message: &str, category: Category, severity: Severity) {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Notice {
                message: message.to_string(),
                category,
                severity,
            });
    }
}
