//! mirrorkeep sync - one-way replication engine
//!
//! Provides:
//! - Initial recursive replication of include rules into their targets
//! - Live reflection of filesystem changes onto the targets
//! - Deferred re-attempts of operations that failed recoverably
//! - Rule activation/deactivation as target drives come and go
//!
//! ## Modules
//!
//! - [`filesystem`] - Copy/compare/delete/rename primitives
//! - [`replication`] - Initial sync producing watch registrations
//! - [`watcher`] - Per-source-root change subscription and event reflection
//! - [`retry`] - Retry queue and its timer driver
//! - [`drives`] - Drive presence tracking and the polling volume monitor
//! - [`supervisor`] - Ties the above together for the controlling process

pub mod drives;
pub mod filesystem;
pub mod replication;
pub mod retry;
pub mod supervisor;
pub mod watcher;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur during replication operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error tied to a specific path
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file is currently locked by another process
    #[error("File locked: {}", .0.display())]
    FileLocked(PathBuf),

    /// No available disk space to complete the operation
    #[error("Disk full")]
    DiskFull,

    /// Insufficient filesystem permissions
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// The specified path does not exist
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// The OS change-notification facility reported an error
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl SyncError {
    /// Classifies an I/O error raised while operating on `path`
    ///
    /// Permission and lock failures become [`SyncError::PermissionDenied`] /
    /// [`SyncError::FileLocked`] (recoverable), a full disk becomes
    /// [`SyncError::DiskFull`], a missing path [`SyncError::PathNotFound`].
    /// Everything else is kept as a fatal [`SyncError::Io`].
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        if is_lock_violation(&err) {
            return SyncError::FileLocked(path.to_path_buf());
        }
        if is_disk_full(&err) {
            return SyncError::DiskFull;
        }
        match err.kind() {
            ErrorKind::PermissionDenied => SyncError::PermissionDenied(path.to_path_buf()),
            ErrorKind::NotFound => SyncError::PathNotFound(path.to_path_buf()),
            _ => SyncError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// Returns true if the failure is expected to clear without intervention
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::FileLocked(_) | SyncError::PermissionDenied(_))
    }
}

#[cfg(unix)]
fn is_lock_violation(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EBUSY) | Some(libc::ETXTBSY))
}

#[cfg(windows)]
fn is_lock_violation(err: &std::io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(any(unix, windows)))]
fn is_lock_violation(_err: &std::io::Error) -> bool {
    false
}

#[cfg(unix)]
fn is_disk_full(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSPC)
}

#[cfg(windows)]
fn is_disk_full(err: &std::io::Error) -> bool {
    // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
    matches!(err.raw_os_error(), Some(39) | Some(112))
}

#[cfg(not(any(unix, windows)))]
fn is_disk_full(_err: &std::io::Error) -> bool {
    false
}

/// Result alias for replication operations
pub type Result<T> = std::result::Result<T, SyncError>;
