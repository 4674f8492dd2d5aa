//! Port definitions (collaborator interfaces)
//!
//! The core consumes these capabilities but never implements OS-specific
//! behaviour itself:
//!
//! - [`Notifier`] - Single reporting sink for every component
//! - [`VolumeMonitor`] - "Volumes changed" notifications
//! - [`AutostartRegistrar`] - Start-at-login registration

pub mod autostart;
pub mod notifier;
pub mod volume;

pub use autostart::AutostartRegistrar;
pub use notifier::{Category, CollectingNotifier, Notice, Notifier, Severity, TracingNotifier};
pub use volume::{VolumeMonitor, VolumesChanged};
