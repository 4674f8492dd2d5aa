//! Auto-start registration port
//!
//! Registers the running executable to be launched at user login. Called
//! once at startup; implementations must be idempotent.

use std::path::Path;

/// Port trait for start-at-login registration
pub trait AutostartRegistrar {
    /// Ensures `executable` is registered to start at login under `app_name`
    ///
    /// Returns `true` if the registration was created or changed, `false` if
    /// it was already in place.
    fn ensure_registered(&self, executable: &Path, app_name: &str) -> anyhow::Result<bool>;
}
