//! Volume-change subscription port
//!
//! The drive presence tracker only needs to know *that* the set of mounted
//! volumes may have changed; it re-queries drive existence itself. A
//! [`VolumeMonitor`] therefore exposes a single payload-free callback.
//!
//! Implementations may pump an OS message loop, subscribe to kernel events or
//! poll the mount table. They are swappable without touching the tracker.

use std::sync::Arc;

/// Callback fired when volumes may have been added or removed
pub type VolumesChanged = Arc<dyn Fn() + Send + Sync>;

/// Port trait for OS volume arrival/removal notifications
pub trait VolumeMonitor: Send {
    /// Starts delivering notifications to `on_change` from a background thread
    ///
    /// # Errors
    /// Returns an error if the monitor is already running or the OS
    /// subscription cannot be established
    fn start(&mut self, on_change: VolumesChanged) -> anyhow::Result<()>;

    /// Stops delivering notifications
    ///
    /// Blocks until the background thread has exited; no callback runs after
    /// this returns.
    fn stop(&mut self);
}
